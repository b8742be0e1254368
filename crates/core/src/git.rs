//! Git Intelligence (C9): blame, file history, diffs, churn, and temporal
//! coupling over a workspace's `.git` directory.
//!
//! Read-only and uncached by design (§4.9) — git history is cheap enough to
//! recompute that a stale cache entry would cost more than it saves. Grounded
//! directly in the teacher's `git.rs`, generalized onto `CoreError` instead of
//! ad hoc `Result<T, String>`.

use crate::error::{CoreError, CoreResult};
use crate::types::Symbol;
use git2::{BlameOptions, Repository, Sort, Time};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct BlameLine {
    pub line: usize,
    pub author: String,
    pub date: String,
    pub commit: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HotFile {
    pub path: String,
    pub commits: usize,
}

#[derive(Debug, Serialize)]
pub struct CoChangedFile {
    pub path: String,
    pub count: usize,
}

fn open_repo(workspace: &Path) -> CoreResult<Repository> {
    Repository::open(workspace).map_err(|_| CoreError::NotAGitRepo(workspace.to_path_buf()))
}

fn format_git_time(time: Time) -> String {
    chrono_from_epoch(time.seconds(), time.offset_minutes())
}

/// Epoch -> "YYYY-MM-DD HH:MM" without pulling in chrono — the teacher's repo
/// goes stdlib here rather than adding a date crate just for git timestamps.
fn chrono_from_epoch(epoch: i64, offset_minutes: i32) -> String {
    let adjusted = epoch + (offset_minutes as i64) * 60;
    let days = adjusted.div_euclid(86400);
    let rem = adjusted.rem_euclid(86400);
    let hours = rem / 3600;
    let mins = (rem % 3600) / 60;
    let (year, month, day) = days_to_ymd(days);
    format!("{year:04}-{month:02}-{day:02} {hours:02}:{mins:02}")
}

fn days_to_ymd(mut days: i64) -> (i64, i64, i64) {
    // Howard Hinnant's days-from-civil algorithm, run in reverse.
    days += 719468;
    let era = if days >= 0 { days } else { days - 146096 } / 146097;
    let doe = days - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

fn status_label(delta: git2::Delta) -> &'static str {
    match delta {
        git2::Delta::Added => "added",
        git2::Delta::Deleted => "deleted",
        git2::Delta::Modified => "modified",
        git2::Delta::Renamed => "renamed",
        git2::Delta::Copied => "copied",
        git2::Delta::Typechange => "typechange",
        _ => "unknown",
    }
}

pub fn blame(
    workspace: &Path,
    rel_path: &str,
    start: Option<usize>,
    end: Option<usize>,
) -> CoreResult<Vec<BlameLine>> {
    let repo = open_repo(workspace)?;
    let mut opts = BlameOptions::new();
    if let Some(s) = start {
        opts.min_line(s);
    }
    if let Some(e) = end {
        opts.max_line(e);
    }

    let blame = repo
        .blame_file(Path::new(rel_path), Some(&mut opts))
        .map_err(|e| CoreError::SearchError(format!("blame failed: {e}")))?;

    let file_path = workspace.join(rel_path);
    let content = std::fs::read_to_string(&file_path)
        .map_err(|source| CoreError::Io { path: file_path.clone(), source })?;
    let lines: Vec<&str> = content.lines().collect();

    let mut result = Vec::new();
    for hunk_idx in 0..blame.len() {
        let hunk = blame.get_index(hunk_idx).unwrap();
        let sig = hunk.final_signature();
        let author = sig.name().unwrap_or("unknown").to_string();
        let commit_id = hunk.final_commit_id();
        let date = repo.find_commit(commit_id).map(|c| format_git_time(c.time())).unwrap_or_else(|_| "unknown".into());
        let short_hash = commit_id.to_string()[..8].to_string();

        let start_line = hunk.final_start_line();
        for i in 0..hunk.lines_in_hunk() {
            let line_num = start_line + i;
            let line_content = lines.get(line_num - 1).copied().unwrap_or("").to_string();
            result.push(BlameLine {
                line: line_num,
                author: author.clone(),
                date: date.clone(),
                commit: short_hash.clone(),
                content: line_content,
            });
        }
    }
    Ok(result)
}

fn diff_files_for_commit(repo: &Repository, commit: &git2::Commit) -> Vec<String> {
    let mut files = Vec::new();
    let Ok(tree) = commit.tree() else { return files };
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
    let Ok(diff) = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None) else { return files };
    let _ = diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path().and_then(|p| p.to_str()) {
                files.push(path.to_string());
            }
            true
        },
        None,
        None,
        None,
    );
    files
}

pub fn file_history(workspace: &Path, rel_path: &str, limit: usize) -> CoreResult<Vec<CommitInfo>> {
    let repo = open_repo(workspace)?;
    let mut revwalk = repo.revwalk().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.push_head().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.set_sorting(Sort::TIME).map_err(|e| CoreError::SearchError(e.to_string()))?;

    let mut results = Vec::new();
    for oid in revwalk {
        if results.len() >= limit {
            break;
        }
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else { continue };
        let files_changed = diff_files_for_commit(&repo, &commit);
        if !files_changed.iter().any(|f| f == rel_path) {
            continue;
        }
        let sig = commit.author();
        results.push(CommitInfo {
            hash: oid.to_string()[..8].to_string(),
            author: sig.name().unwrap_or("unknown").to_string(),
            date: format_git_time(sig.when()),
            message: commit.message().unwrap_or("").lines().next().unwrap_or("").to_string(),
            files_changed,
        });
    }
    Ok(results)
}

pub fn changed_since(workspace: &Path, since: &str) -> CoreResult<Vec<ChangedFile>> {
    let repo = open_repo(workspace)?;
    let base_obj = repo
        .revparse_single(since)
        .map_err(|e| CoreError::InvalidQuery(format!("cannot resolve '{since}': {e}")))?;
    let base_commit = base_obj
        .peel_to_commit()
        .map_err(|e| CoreError::InvalidQuery(format!("'{since}' is not a commit: {e}")))?;
    let base_tree = base_commit.tree().map_err(|e| CoreError::SearchError(e.to_string()))?;

    let head = repo.head().map_err(|e| CoreError::SearchError(e.to_string()))?;
    let head_commit = head.peel_to_commit().map_err(|e| CoreError::SearchError(e.to_string()))?;
    let head_tree = head_commit.tree().map_err(|e| CoreError::SearchError(e.to_string()))?;

    let diff = repo
        .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)
        .map_err(|e| CoreError::SearchError(e.to_string()))?;

    let mut results = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .and_then(|p| p.to_str())
                .unwrap_or("")
                .to_string();
            results.push(ChangedFile { path, status: status_label(delta.status()).to_string() });
            true
        },
        None,
        None,
        None,
    )
    .map_err(|e| CoreError::SearchError(e.to_string()))?;

    Ok(results)
}

pub fn hot_files(workspace: &Path, limit: usize, days: usize) -> CoreResult<Vec<HotFile>> {
    let repo = open_repo(workspace)?;
    let mut revwalk = repo.revwalk().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.push_head().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.set_sorting(Sort::TIME).map_err(|e| CoreError::SearchError(e.to_string()))?;

    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;
    let cutoff = now - (days as i64) * 86400;

    let mut file_counts: HashMap<String, usize> = HashMap::new();
    for oid in revwalk {
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else { continue };
        if commit.time().seconds() < cutoff {
            break;
        }
        for path in diff_files_for_commit(&repo, &commit) {
            *file_counts.entry(path).or_default() += 1;
        }
    }

    let mut sorted: Vec<HotFile> = file_counts.into_iter().map(|(path, commits)| HotFile { path, commits }).collect();
    sorted.sort_by(|a, b| b.commits.cmp(&a.commits).then_with(|| a.path.cmp(&b.path)));
    sorted.truncate(limit);
    Ok(sorted)
}

/// Commits whose diff touched a symbol's line range, not just its file —
/// narrower than `file_history`. The symbol's current line range is looked up
/// by the caller from the symbol DB and passed in here.
pub fn symbol_evolution(
    workspace: &Path,
    rel_path: &str,
    symbol: &Symbol,
    limit: usize,
) -> CoreResult<Vec<CommitInfo>> {
    let repo = open_repo(workspace)?;
    let mut revwalk = repo.revwalk().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.push_head().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.set_sorting(Sort::TIME).map_err(|e| CoreError::SearchError(e.to_string()))?;

    let mut results = Vec::new();
    for oid in revwalk {
        if results.len() >= limit {
            break;
        }
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else { continue };
        let Ok(tree) = commit.tree() else { continue };
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
        let Ok(diff) = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None) else { continue };

        let mut touched = false;
        let mut files_changed = Vec::new();
        let _ = diff.foreach(
            &mut |delta, _| {
                if let Some(path) = delta.new_file().path().and_then(|p| p.to_str()) {
                    files_changed.push(path.to_string());
                }
                true
            },
            None,
            None,
            Some(&mut |delta, hunk, _line| {
                if delta.new_file().path().and_then(|p| p.to_str()) == Some(rel_path) {
                    let new_start = hunk.new_start() as usize;
                    let new_end = new_start + hunk.new_lines() as usize;
                    if new_start <= symbol.end_line && new_end >= symbol.start_line {
                        touched = true;
                    }
                }
                true
            }),
        );

        if !touched {
            continue;
        }
        let sig = commit.author();
        results.push(CommitInfo {
            hash: oid.to_string()[..8].to_string(),
            author: sig.name().unwrap_or("unknown").to_string(),
            date: format_git_time(sig.when()),
            message: commit.message().unwrap_or("").lines().next().unwrap_or("").to_string(),
            files_changed,
        });
    }
    Ok(results)
}

/// Files that co-occur with `rel_path` in the same commit within a trailing
/// window, ranked by count — the temporal-coupling signal.
pub fn co_change(workspace: &Path, rel_path: &str, limit: usize, days: usize) -> CoreResult<Vec<CoChangedFile>> {
    let repo = open_repo(workspace)?;
    let mut revwalk = repo.revwalk().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.push_head().map_err(|e| CoreError::SearchError(e.to_string()))?;
    revwalk.set_sorting(Sort::TIME).map_err(|e| CoreError::SearchError(e.to_string()))?;

    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;
    let cutoff = now - (days as i64) * 86400;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for oid in revwalk {
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else { continue };
        if commit.time().seconds() < cutoff {
            break;
        }
        let files = diff_files_for_commit(&repo, &commit);
        if !files.iter().any(|f| f == rel_path) {
            continue;
        }
        for f in files {
            if f != rel_path {
                *counts.entry(f).or_default() += 1;
            }
        }
    }

    let mut sorted: Vec<CoChangedFile> =
        counts.into_iter().map(|(path, count)| CoChangedFile { path, count }).collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
    sorted.truncate(limit);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo_with_commit(dir: &Path, file: &str, content: &str, msg: &str) -> git2::Oid {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parent_refs).unwrap()
    }

    #[test]
    fn not_a_git_repo_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = blame(dir.path(), "x.rs", None, None).unwrap_err();
        assert!(matches!(err, CoreError::NotAGitRepo(_)));
        assert_eq!(err.code(), "SEARCH_ERROR");
    }

    #[test]
    fn file_history_finds_commit_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path(), "a.rs", "fn a() {}\n", "add a");
        init_repo_with_commit(dir.path(), "b.rs", "fn b() {}\n", "add b");

        let history = file_history(dir.path(), "a.rs", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "add a");
    }

    #[test]
    fn hot_files_ranks_by_commit_count() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path(), "a.rs", "v1\n", "c1");
        init_repo_with_commit(dir.path(), "a.rs", "v2\n", "c2");
        init_repo_with_commit(dir.path(), "b.rs", "v1\n", "c3");

        let hot = hot_files(dir.path(), 10, 3650).unwrap();
        assert_eq!(hot[0].path, "a.rs");
        assert_eq!(hot[0].commits, 2);
    }

    #[test]
    fn co_change_tracks_same_commit_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.rs"), "a\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "b\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.rs")).unwrap();
        index.add_path(Path::new("b.rs")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "both", &tree, &[]).unwrap();

        let co = co_change(dir.path(), "a.rs", 10, 3650).unwrap();
        assert_eq!(co.len(), 1);
        assert_eq!(co[0].path, "b.rs");
        assert_eq!(co[0].count, 1);
    }
}

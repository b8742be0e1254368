//! File watcher for incremental live re-indexing (feeds C10/C1 without a
//! full rescan). Grounded on the teacher's `watch.rs`: the same debounced
//! event-collection loop over `notify`, adapted from a multi-repo
//! `ServerState` to a single `WorkspaceHandle`.

use crate::ast::update_ast_for_file;
use crate::config::WorkspaceConfig;
use crate::graph::build_code_graph;
use crate::scan::scan_imports;
use crate::store::WorkspaceHandle;
use crate::types::ScannedFile;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait this long after the last event on a path before re-indexing it.
const DEBOUNCE_MS: u64 = 500;

/// Start watching `workspace_root` for changes, incrementally updating
/// `handle` as files are created, modified, or removed. Returns the watcher
/// handle — dropping it stops watching.
pub fn start_watcher(handle: Arc<WorkspaceHandle>, workspace_root: PathBuf) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create file watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&workspace_root, RecursiveMode::Recursive) {
        tracing::warn!(path = %workspace_root.display(), error = %e, "failed to watch workspace root");
        return None;
    }
    tracing::info!(path = %workspace_root.display(), "watching workspace for changes");

    std::thread::spawn(move || debounce_loop(rx, handle, workspace_root));
    Some(watcher)
}

fn debounce_loop(rx: mpsc::Receiver<Event>, handle: Arc<WorkspaceHandle>, workspace_root: PathBuf) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
            Ok(event) => {
                let relevant =
                    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_));
                if relevant {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, now);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<PathBuf> = pending.iter().filter(|(_, t)| **t <= cutoff).map(|(p, _)| p.clone()).collect();
                if ready.is_empty() {
                    continue;
                }
                for path in &ready {
                    pending.remove(path);
                }
                process_changes(&ready, &handle, &workspace_root);
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn process_changes(paths: &[PathBuf], handle: &Arc<WorkspaceHandle>, workspace_root: &Path) {
    let config = WorkspaceConfig::load(workspace_root);
    let skip_dirs = config.skip_dirs_set();
    let extensions = config.extensions_set();

    for path in paths {
        let Ok(rel) = path.strip_prefix(workspace_root) else { continue };
        let rel_path = rel.to_string_lossy().replace('\\', "/");

        if path.components().any(|c| skip_dirs.contains(c.as_os_str().to_string_lossy().as_ref())) {
            continue;
        }

        if !path.exists() {
            if let Err(e) = handle.remove_file(&rel_path) {
                tracing::warn!(path = %rel_path, error = %e, "failed to remove deleted file from index");
            }
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        if !extensions.is_empty() && !extensions.contains(ext) {
            continue;
        }
        let Ok(meta) = std::fs::metadata(path) else { continue };

        let file = ScannedFile {
            rel_path: rel_path.clone(),
            abs_path: path.clone(),
            ext: ext.to_string(),
            size: meta.len(),
            last_modified: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        };

        let mut ast_index = HashMap::new();
        update_ast_for_file(&mut ast_index, &rel_path, path, ext);
        let import_graph = scan_imports(std::slice::from_ref(&file));
        let graph = build_code_graph(&ast_index, &import_graph, std::slice::from_ref(&(rel_path.clone(), path.clone())));

        if let Err(e) = handle.update_file(&file, &ast_index, &graph.occurrences) {
            tracing::warn!(path = %rel_path, error = %e, "failed to re-index changed file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use std::fs;

    #[test]
    fn process_changes_indexes_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Arc::new(store::open(dir.path()).unwrap());
        let path = dir.path().join("added.rs");
        fs::write(&path, "pub fn added_fn() {}\n").unwrap();

        process_changes(&[path], &handle, dir.path());

        let symbols = handle.get_symbols_by_name("added_fn", true).unwrap();
        assert_eq!(symbols.len(), 1);
    }

    #[test]
    fn process_changes_removes_a_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Arc::new(store::open(dir.path()).unwrap());
        let path = dir.path().join("gone.rs");
        fs::write(&path, "pub fn gone_fn() {}\n").unwrap();
        process_changes(&[path.clone()], &handle, dir.path());
        assert_eq!(handle.get_symbols_by_name("gone_fn", true).unwrap().len(), 1);

        fs::remove_file(&path).unwrap();
        process_changes(&[path], &handle, dir.path());
        assert_eq!(handle.get_symbols_by_name("gone_fn", true).unwrap().len(), 0);
    }

    #[test]
    fn process_changes_skips_files_outside_the_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let handle = Arc::new(store::open(dir.path()).unwrap());
        let path = outside.path().join("unrelated.rs");
        fs::write(&path, "pub fn unrelated() {}\n").unwrap();

        // Should not panic despite the path not being under the workspace root.
        process_changes(&[path], &handle, dir.path());
        assert!(handle.get_symbols_by_name("unrelated", true).unwrap().is_empty());
    }
}

//! Workspace scanning: the file-walk half of the in-process ingestion
//! producer (C10). Discovers files, builds the import graph, and resolves
//! directory records for `directory_search`.

use crate::config::WorkspaceConfig;
use crate::types::ScannedFile;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

fn is_text_file(path: &Path) -> bool {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buf = [0u8; 8192];
    let n = match std::io::Read::read(&mut file, &mut buf) {
        Ok(n) => n,
        Err(_) => return false,
    };
    !buf[..n].contains(&0)
}

fn walk_files_parallel(
    workspace: &Path,
    skip_dirs: &HashSet<String>,
    ext_filter: Option<&HashSet<String>>,
) -> Vec<(std::path::PathBuf, String)> {
    let results: Mutex<Vec<(std::path::PathBuf, String)>> = Mutex::new(Vec::new());
    let skip = skip_dirs.clone();

    WalkBuilder::new(workspace)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .threads(rayon::current_num_threads().min(12))
        .filter_entry(move |entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !skip.contains(name.as_ref());
            }
            true
        })
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }
                let abs_path = entry.path().to_path_buf();
                let ext_str = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");

                if let Some(exts) = ext_filter {
                    if !exts.contains(ext_str) {
                        return ignore::WalkState::Continue;
                    }
                }

                let rel_path = abs_path
                    .strip_prefix(workspace)
                    .unwrap_or(&abs_path)
                    .to_string_lossy()
                    .replace('\\', "/");

                results.lock().unwrap().push((abs_path, rel_path));
                ignore::WalkState::Continue
            })
        });

    results.into_inner().unwrap()
}

/// Walk the workspace and return every indexable file.
pub fn scan_files(workspace: &Path, config: &WorkspaceConfig) -> Vec<ScannedFile> {
    let skip_dirs = config.skip_dirs_set();
    let ext_filter: Option<HashSet<String>> =
        if config.extensions.is_empty() { None } else { Some(config.extensions_set()) };

    let raw = walk_files_parallel(workspace, &skip_dirs, ext_filter.as_ref());
    let raw: Vec<(std::path::PathBuf, String)> = if ext_filter.is_none() {
        raw.into_par_iter().filter(|(p, _)| is_text_file(p)).collect()
    } else {
        raw
    };

    raw.par_iter()
        .map(|(abs_path, rel_path)| {
            let meta = fs::metadata(abs_path);
            let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
            let last_modified = meta
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_string();
            ScannedFile { rel_path: rel_path.clone(), abs_path: abs_path.clone(), ext, size, last_modified }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Directory search (§4.8 `directory_search`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectoryRecord {
    pub path: String,
    pub name: String,
    pub parent: String,
    pub depth: usize,
    pub file_count: usize,
    pub subdir_count: usize,
    pub is_hidden: bool,
}

/// Enumerate directories under the workspace, with file/subdir counts, for
/// `directory_search`. `files` must come from `scan_files` (already excludes
/// skip_dirs).
pub fn enumerate_directories(files: &[ScannedFile]) -> Vec<DirectoryRecord> {
    let mut dirs: BTreeMap<String, (usize, HashSet<String>)> = BTreeMap::new();
    dirs.entry(String::new()).or_default();

    for f in files {
        let parts: Vec<&str> = f.rel_path.split('/').collect();
        let mut acc = String::new();
        for (i, part) in parts.iter().enumerate() {
            let is_last = i == parts.len() - 1;
            if is_last {
                // filename, not a directory component
                dirs.entry(acc.clone()).or_default().0 += 1;
                break;
            }
            let parent = acc.clone();
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(part);
            dirs.entry(acc.clone()).or_default();
            if !parent.is_empty() || i == 0 {
                dirs.entry(parent).or_default().1.insert(part.to_string());
            }
        }
    }

    dirs.into_iter()
        .filter(|(path, _)| !path.is_empty())
        .map(|(path, (file_count, subdirs))| {
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            let parent = path.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default();
            let depth = path.split('/').count();
            let is_hidden = path.split('/').any(|seg| seg.starts_with('.'));
            DirectoryRecord { path, name, parent, depth, file_count, subdir_count: subdirs.len(), is_hidden }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Import graph — multi-language import/include resolution (feeds graph.rs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ImportGraph {
    pub imports: BTreeMap<String, Vec<String>>,
    pub imported_by: BTreeMap<String, Vec<String>>,
}

fn import_exts_cpp() -> HashSet<&'static str> {
    ["h", "cpp", "c", "cc", "cxx", "hpp", "hxx"].iter().copied().collect()
}
fn import_exts_python() -> HashSet<&'static str> {
    ["py"].iter().copied().collect()
}
fn import_exts_js() -> HashSet<&'static str> {
    ["js", "ts", "jsx", "tsx", "mjs", "cjs"].iter().copied().collect()
}
fn import_exts_rust() -> HashSet<&'static str> {
    ["rs"].iter().copied().collect()
}
fn import_exts_go() -> HashSet<&'static str> {
    ["go"].iter().copied().collect()
}

/// Parse import/include directives across all files and build a bidirectional
/// import graph. Grounded directly in the teacher's regex-based multi-language
/// resolver; C#/PowerShell families dropped as out of scope for the languages
/// this crate's AST layer actually understands.
pub fn scan_imports(all_files: &[ScannedFile]) -> ImportGraph {
    let cpp_exts = import_exts_cpp();
    let py_exts = import_exts_python();
    let js_exts = import_exts_js();
    let rust_exts = import_exts_rust();
    let go_exts = import_exts_go();

    let include_re = regex::Regex::new(r#"#include\s+"([^"]+)""#).unwrap();
    let py_import_re = regex::Regex::new(r#"(?m)(?:from\s+([\w.]+)\s+import|^import\s+([\w.]+))"#).unwrap();
    let js_import_re =
        regex::Regex::new(r#"(?:from\s+['"]([^'"]+)['"]|require\s*\(\s*['"]([^'"]+)['"]\s*\))"#).unwrap();
    let rust_import_re = regex::Regex::new(r#"(?:use\s+(?:crate|super)::([\w]+)|mod\s+([\w]+)\s*;)"#).unwrap();
    let go_import_re = regex::Regex::new(r#"import\s+(?:\(\s*)?(?:"([^"]+)")"#).unwrap();

    let mut filename_to_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut filename_ext_to_paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for f in all_files {
        let full_filename = f.rel_path.rsplit('/').next().unwrap_or(&f.rel_path);
        filename_ext_to_paths.entry(full_filename.to_string()).or_default().push(f.rel_path.clone());
        let stem = full_filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(full_filename);
        filename_to_paths.entry(stem.to_string()).or_default().push(f.rel_path.clone());
    }

    let resolve_import = |import_str: &str| -> Option<String> {
        let filename = import_str.rsplit('/').next().unwrap_or(import_str);
        if let Some(candidates) = filename_ext_to_paths.get(filename) {
            if candidates.len() == 1 {
                return Some(candidates[0].clone());
            }
            let best = candidates.iter().find(|c| c.ends_with(import_str)).or_else(|| candidates.first());
            if let Some(b) = best {
                return Some(b.clone());
            }
        }
        let last_component = import_str.rsplit(&['.', '/'][..]).next().unwrap_or(import_str);
        if let Some(candidates) = filename_to_paths.get(last_component) {
            return if candidates.len() == 1 { Some(candidates[0].clone()) } else { candidates.first().cloned() };
        }
        None
    };

    let pairs: Vec<(String, Vec<String>)> = all_files
        .par_iter()
        .filter_map(|f| {
            let ext = f.ext.as_str();
            let relevant = cpp_exts.contains(ext)
                || py_exts.contains(ext)
                || js_exts.contains(ext)
                || rust_exts.contains(ext)
                || go_exts.contains(ext);
            if !relevant {
                return None;
            }
            let content = fs::read_to_string(&f.abs_path).ok()?;
            let mut resolved = Vec::new();

            if cpp_exts.contains(ext) {
                for cap in include_re.captures_iter(&content) {
                    if let Some(path) = resolve_import(&cap[1]) {
                        resolved.push(path);
                    }
                }
            }
            if py_exts.contains(ext) {
                for cap in py_import_re.captures_iter(&content) {
                    let import_str = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()).unwrap_or("");
                    if !import_str.is_empty() {
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    }
                }
            }
            if js_exts.contains(ext) {
                for cap in js_import_re.captures_iter(&content) {
                    let import_str = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()).unwrap_or("");
                    if !import_str.is_empty() {
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    }
                }
            }
            if rust_exts.contains(ext) {
                for cap in rust_import_re.captures_iter(&content) {
                    let import_str = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()).unwrap_or("");
                    if !import_str.is_empty() {
                        if let Some(path) = resolve_import(import_str) {
                            resolved.push(path);
                        }
                    }
                }
            }
            if go_exts.contains(ext) {
                for cap in go_import_re.captures_iter(&content) {
                    if let Some(m) = cap.get(1) {
                        if let Some(path) = resolve_import(m.as_str()) {
                            resolved.push(path);
                        }
                    }
                }
            }

            if resolved.is_empty() {
                None
            } else {
                resolved.sort();
                resolved.dedup();
                Some((f.rel_path.clone(), resolved))
            }
        })
        .collect();

    let mut imports: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut imported_by: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (file, deps) in pairs {
        for dep in &deps {
            imported_by.entry(dep.clone()).or_default().push(file.clone());
        }
        imports.insert(file, deps);
    }
    for list in imported_by.values_mut() {
        list.sort();
    }

    ImportGraph { imports, imported_by }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_rust_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn main() {}\n").unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/junk.rs"), "junk\n").unwrap();

        let cfg = WorkspaceConfig::default();
        let files = scan_files(dir.path(), &cfg);
        assert!(files.iter().any(|f| f.rel_path == "src/lib.rs"));
        assert!(!files.iter().any(|f| f.rel_path.starts_with("target/")));
    }

    #[test]
    fn import_graph_resolves_rust_mod() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "mod helpers;\nfn main() {}\n").unwrap();
        std::fs::write(dir.path().join("src/helpers.rs"), "pub fn help() {}\n").unwrap();

        let cfg = WorkspaceConfig::default();
        let files = scan_files(dir.path(), &cfg);
        let graph = scan_imports(&files);
        assert_eq!(graph.imports.get("src/main.rs").map(|v| v.as_slice()), Some(&["src/helpers.rs".to_string()][..]));
    }

    #[test]
    fn directory_enumeration_counts_files() {
        let files = vec![
            ScannedFile {
                rel_path: "src/lib.rs".into(),
                abs_path: "/tmp/src/lib.rs".into(),
                ext: "rs".into(),
                size: 10,
                last_modified: 0,
            },
            ScannedFile {
                rel_path: "src/util.rs".into(),
                abs_path: "/tmp/src/util.rs".into(),
                ext: "rs".into(),
                size: 10,
                last_modified: 0,
            },
        ];
        let dirs = enumerate_directories(&files);
        let src = dirs.iter().find(|d| d.path == "src").unwrap();
        assert_eq!(src.file_count, 2);
    }
}

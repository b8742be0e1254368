//! Refactor Executor (C7) — rename/extract/move/interface/search-replace,
//! all honoring `dry_run` per §4.7. Rewrites go through the file-edit
//! primitive's byte-edit mode so encoding-on-write always matches
//! encoding-on-read.

use crate::error::{CoreError, CoreResult};
use crate::fileedit;
use crate::resolver;
use crate::store::WorkspaceHandle;
use crate::types::{ByteEdit, FileApplyResult, FileEditPlan, RefactorPlan, RefactorResult, Symbol};

use std::collections::HashMap;
use std::path::Path;

const DEFAULT_MAX_FILES: usize = 500;

// ---------------------------------------------------------------------------
// rename_symbol
// ---------------------------------------------------------------------------

/// Resolve every reference to `old_name` across the workspace, rewrite each
/// occurrence to `new_name` via byte edits sorted descending by start offset
/// within a file. Idempotent: re-running after a successful rename finds no
/// occurrences of `old_name` and returns an empty plan.
pub fn rename_symbol(
    handle: &WorkspaceHandle,
    workspace_root: &Path,
    old_name: &str,
    new_name: &str,
    dry_run: bool,
    max_files: Option<usize>,
) -> CoreResult<RefactorResult> {
    let max_files = max_files.unwrap_or(DEFAULT_MAX_FILES);
    let references = resolver::find_references(handle, workspace_root, old_name, true)?;

    let mut by_file: HashMap<String, Vec<ByteEdit>> = HashMap::new();
    let mut warnings = Vec::new();

    for reference in &references {
        let occ = &reference.occurrence;
        if occ.end_byte < occ.start_byte {
            warnings.push(format!("skipped invalid byte span in {} at line {}", occ.file_path, occ.start_line));
            continue;
        }
        by_file.entry(occ.file_path.clone()).or_default().push(ByteEdit {
            start_byte: occ.start_byte,
            end_byte: occ.end_byte,
            replacement: new_name.to_string(),
        });
    }

    if by_file.len() > max_files {
        warnings.push(format!("rename spans {} files, exceeding max_files={max_files}; truncating", by_file.len()));
    }

    let mut files: Vec<FileEditPlan> = by_file
        .into_iter()
        .take(max_files)
        .map(|(path, mut edits)| {
            edits.sort_by(|a, b| b.start_byte.cmp(&a.start_byte));
            FileEditPlan { path, edits }
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let plan = RefactorPlan { operation: "rename_symbol".into(), files, warnings };
    apply_or_plan(plan, dry_run, workspace_root)
}

fn apply_or_plan(plan: RefactorPlan, dry_run: bool, workspace_root: &Path) -> CoreResult<RefactorResult> {
    if dry_run {
        return Ok(RefactorResult { operation: plan.operation.clone(), dry_run: true, plan, applied: Vec::new() });
    }

    let mut applied = Vec::new();
    for file_plan in &plan.files {
        match fileedit::apply_byte_edits(workspace_root, &file_plan.path, &file_plan.edits) {
            Ok(()) => applied.push(FileApplyResult { path: file_plan.path.clone(), applied: true, error: None }),
            Err(e) => applied.push(FileApplyResult { path: file_plan.path.clone(), applied: false, error: Some(e.to_string()) }),
        }
    }

    Ok(RefactorResult { operation: plan.operation.clone(), dry_run: false, plan, applied })
}

// ---------------------------------------------------------------------------
// extract_to_file / move_symbol_to_file
// ---------------------------------------------------------------------------

fn namespace_preamble(source_lines: &[String], language: &str) -> String {
    let marker: &[&str] = match language {
        "rust" => &["use "],
        "python" => &["import ", "from "],
        "typescript" | "javascript" => &["import "],
        "csharp" => &["using ", "namespace "],
        _ => &["import ", "using ", "use "],
    };
    let mut preamble = String::new();
    for line in source_lines {
        if marker.iter().any(|m| line.trim_start().starts_with(m)) {
            preamble.push_str(line);
            preamble.push('\n');
        }
    }
    preamble
}

fn definition_body(symbol: &Symbol, source_lines: &[String]) -> String {
    let start = symbol.start_line.saturating_sub(1);
    let end = symbol.end_line.min(source_lines.len());
    source_lines[start..end].join("\n") + "\n"
}

/// `extract_to_file(symbol, target)` per §4.7. Writes `target` only if it
/// does not already exist; never modifies the source file.
pub fn extract_to_file(
    handle: &WorkspaceHandle,
    workspace_root: &Path,
    symbol_name: &str,
    target: &str,
    dry_run: bool,
) -> CoreResult<RefactorResult> {
    let symbol = handle
        .get_symbol_definition(symbol_name)?
        .ok_or_else(|| CoreError::SymbolNotFound(symbol_name.to_string()))?;

    let target_abs = workspace_root.join(target);
    if target_abs.exists() {
        return Err(CoreError::TargetExists(target_abs));
    }

    let source_read = fileedit::read_with_encoding(workspace_root, &symbol.file_path)?;
    let preamble = namespace_preamble(&source_read.lines, &symbol.language);
    let body = definition_body(&symbol, &source_read.lines);
    let content = format!("{preamble}{body}");

    let plan = RefactorPlan {
        operation: "extract_to_file".into(),
        files: vec![FileEditPlan {
            path: target.to_string(),
            edits: vec![ByteEdit { start_byte: 0, end_byte: 0, replacement: content }],
        }],
        warnings: Vec::new(),
    };

    if dry_run {
        return Ok(RefactorResult { operation: plan.operation.clone(), dry_run: true, plan, applied: Vec::new() });
    }

    let write_result = std::fs::write(&target_abs, &plan.files[0].edits[0].replacement)
        .map_err(|source| CoreError::Io { path: target_abs.clone(), source });
    let applied = vec![match write_result {
        Ok(()) => FileApplyResult { path: target.to_string(), applied: true, error: None },
        Err(e) => FileApplyResult { path: target.to_string(), applied: false, error: Some(e.to_string()) },
    }];

    Ok(RefactorResult { operation: plan.operation.clone(), dry_run: false, plan, applied })
}

/// `move_symbol_to_file(symbol, target)`: `extract_to_file` plus deleting the
/// source range. Fails atomically if `target` exists (checked before any
/// write happens).
pub fn move_symbol_to_file(
    handle: &WorkspaceHandle,
    workspace_root: &Path,
    symbol_name: &str,
    target: &str,
    dry_run: bool,
) -> CoreResult<RefactorResult> {
    let symbol = handle
        .get_symbol_definition(symbol_name)?
        .ok_or_else(|| CoreError::SymbolNotFound(symbol_name.to_string()))?;

    let target_abs = workspace_root.join(target);
    if target_abs.exists() {
        return Err(CoreError::TargetExists(target_abs));
    }

    let mut result = extract_to_file(handle, workspace_root, symbol_name, target, dry_run)?;
    result.operation = "move_symbol_to_file".into();
    result.plan.operation = "move_symbol_to_file".into();

    if !dry_run && result.applied.iter().all(|a| a.applied) {
        match fileedit::delete_lines(workspace_root, &symbol.file_path, symbol.start_line, symbol.end_line) {
            Ok(_) => result.applied.push(FileApplyResult { path: symbol.file_path.clone(), applied: true, error: None }),
            Err(e) => {
                result.applied.push(FileApplyResult { path: symbol.file_path.clone(), applied: false, error: Some(e.to_string()) })
            }
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// extract_interface
// ---------------------------------------------------------------------------

/// Public method/property signature lines within a class body, per a simple
/// regex-free contract: a line that starts with a visibility keyword (or has
/// none, for languages where public is default) and ends with `{` or `;`
/// after the signature, excluding lines that look like field initializers.
fn extract_public_signatures(body_lines: &[String]) -> Vec<String> {
    let mut signatures = Vec::new();
    for line in body_lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("private") || trimmed.starts_with("protected") {
            continue;
        }
        let looks_like_method = trimmed.contains('(')
            && (trimmed.ends_with('{') || trimmed.ends_with(';') || trimmed.ends_with(')'))
            && !trimmed.starts_with("//")
            && !trimmed.starts_with('*');
        if looks_like_method {
            let sig = trimmed.trim_end_matches('{').trim_end().trim_end_matches(';').to_string();
            signatures.push(format!("{sig};"));
        }
    }
    signatures
}

/// `extract_interface(class, interface_name, target?)` per §4.7. Does not
/// modify the class; emits an interface declaration with the same namespace.
pub fn extract_interface(
    handle: &WorkspaceHandle,
    workspace_root: &Path,
    class_name: &str,
    interface_name: &str,
    target: Option<&str>,
    dry_run: bool,
) -> CoreResult<RefactorResult> {
    let symbol = handle.get_symbol_definition(class_name)?.ok_or_else(|| CoreError::SymbolNotFound(class_name.to_string()))?;
    let source_read = fileedit::read_with_encoding(workspace_root, &symbol.file_path)?;
    let preamble = namespace_preamble(&source_read.lines, &symbol.language);
    let body = definition_body(&symbol, &source_read.lines);
    let signatures = extract_public_signatures(&body.lines().map(String::from).collect::<Vec<_>>());

    let target_path = target.map(String::from).unwrap_or_else(|| {
        let dir = Path::new(&symbol.file_path).parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
        let ext = Path::new(&symbol.file_path).extension().and_then(|e| e.to_str()).unwrap_or("rs");
        if dir.is_empty() {
            format!("{interface_name}.{ext}")
        } else {
            format!("{dir}/{interface_name}.{ext}")
        }
    });

    let mut content = preamble;
    content.push_str(&format!("interface {interface_name} {{\n"));
    for sig in &signatures {
        content.push_str("    ");
        content.push_str(sig);
        content.push('\n');
    }
    content.push_str("}\n");

    let plan = RefactorPlan {
        operation: "extract_interface".into(),
        files: vec![FileEditPlan {
            path: target_path.clone(),
            edits: vec![ByteEdit { start_byte: 0, end_byte: 0, replacement: content.clone() }],
        }],
        warnings: Vec::new(),
    };

    if dry_run {
        return Ok(RefactorResult { operation: plan.operation.clone(), dry_run: true, plan, applied: Vec::new() });
    }

    let target_abs = workspace_root.join(&target_path);
    let write_result =
        std::fs::write(&target_abs, &content).map_err(|source| CoreError::Io { path: target_abs.clone(), source });
    let applied = vec![match write_result {
        Ok(()) => FileApplyResult { path: target_path, applied: true, error: None },
        Err(e) => FileApplyResult { path: target_path, applied: false, error: Some(e.to_string()) },
    }];

    Ok(RefactorResult { operation: plan.operation.clone(), dry_run: false, plan, applied })
}

// ---------------------------------------------------------------------------
// search_and_replace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Standard,
    Literal,
    Regex,
    Code,
}

pub struct SearchAndReplaceOptions {
    pub mode: SearchMode,
    pub case_sensitive: bool,
    pub max_matches: usize,
}

/// `search_and_replace` per §4.7. Phase 1 find via C1's store, Phase 2
/// compute per-line byte-offset replacements, Phase 3 apply in reverse line
/// order per file when `preview=false`. Previews never touch disk.
pub fn search_and_replace(
    handle: &WorkspaceHandle,
    workspace_root: &Path,
    search_pattern: &str,
    replace_pattern: &str,
    options: &SearchAndReplaceOptions,
    preview: bool,
) -> CoreResult<RefactorResult> {
    let results = match options.mode {
        SearchMode::Regex => handle.search_regex(search_pattern, options.max_matches, true)?,
        SearchMode::Code => handle.search_symbol_field(search_pattern, options.max_matches, true)?,
        SearchMode::Literal | SearchMode::Standard => handle.search_exact(search_pattern, options.max_matches, true)?,
    };

    let regex = if options.mode == SearchMode::Regex {
        let pattern = if options.case_sensitive { search_pattern.to_string() } else { format!("(?i){search_pattern}") };
        Some(regex::Regex::new(&pattern).map_err(|e| CoreError::InvalidQuery(e.to_string()))?)
    } else {
        None
    };

    // A Tier 2 hit identifies a matching *file*, not a matching line (the
    // store's full-text search doesn't carry per-occurrence positions), so
    // every line of each matched file is scanned here for the real per-line
    // match positions rather than trusting the hit's line number.
    let mut seen_files = std::collections::HashSet::new();
    let mut by_file: HashMap<String, Vec<(usize, ByteEdit)>> = HashMap::new();
    let mut warnings = Vec::new();
    let mut total_matches = 0usize;

    'files: for hit in &results.hits {
        if !seen_files.insert(hit.path.clone()) {
            continue;
        }
        let read = match fileedit::read_with_encoding(workspace_root, &hit.path) {
            Ok(r) => r,
            Err(e) => {
                warnings.push(format!("could not read {}: {e}", hit.path));
                continue;
            }
        };

        let mut byte_offset = 0usize;
        for (idx, line) in read.lines.iter().enumerate() {
            let (matched, replaced_line) = match &regex {
                Some(re) => {
                    if re.is_match(line) {
                        (true, re.replace_all(line, replace_pattern.replace('$', "$$").as_str()).to_string())
                    } else {
                        (false, String::new())
                    }
                }
                None => {
                    let needle = search_pattern;
                    let found = if options.case_sensitive {
                        line.contains(needle)
                    } else {
                        line.to_lowercase().contains(&needle.to_lowercase())
                    };
                    if found {
                        let replaced = if options.case_sensitive {
                            line.replace(needle, replace_pattern)
                        } else {
                            replace_case_insensitive(line, needle, replace_pattern)
                        };
                        (true, replaced)
                    } else {
                        (false, String::new())
                    }
                }
            };

            if matched {
                let edit =
                    ByteEdit { start_byte: byte_offset, end_byte: byte_offset + line.len(), replacement: replaced_line };
                by_file.entry(hit.path.clone()).or_default().push((idx + 1, edit));
                total_matches += 1;
                if total_matches >= options.max_matches {
                    break 'files;
                }
            }

            byte_offset += line.len() + read.line_sep_bytes;
        }
    }

    let mut files: Vec<FileEditPlan> = by_file
        .into_iter()
        .map(|(path, mut edits)| {
            edits.sort_by(|a, b| b.0.cmp(&a.0));
            FileEditPlan { path, edits: edits.into_iter().map(|(_, e)| e).collect() }
        })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let plan = RefactorPlan { operation: "search_and_replace".into(), files, warnings };
    apply_or_plan(plan, preview, workspace_root)
}

fn replace_case_insensitive(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();
    let mut result = String::new();
    let mut rest = haystack;
    let mut lower_rest = lower_haystack.as_str();
    let mut consumed = 0usize;

    while let Some(idx) = lower_rest.find(&lower_needle) {
        result.push_str(&rest[..idx]);
        result.push_str(replacement);
        let advance = idx + lower_needle.len();
        rest = &haystack[consumed + advance..];
        lower_rest = &lower_haystack[consumed + advance..];
        consumed += advance;
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_preamble_collects_rust_use_lines() {
        let lines: Vec<String> = vec!["use std::fmt;".into(), "".into(), "fn f() {}".into()];
        let preamble = namespace_preamble(&lines, "rust");
        assert_eq!(preamble, "use std::fmt;\n");
    }

    #[test]
    fn extract_public_signatures_skips_private() {
        let body = vec![
            "class Foo {".to_string(),
            "    private void helper() {".to_string(),
            "    public int compute(int x) {".to_string(),
            "}".to_string(),
        ];
        let sigs = extract_public_signatures(&body);
        assert_eq!(sigs, vec!["public int compute(int x);"]);
    }

    #[test]
    fn replace_case_insensitive_preserves_replacement_case() {
        let result = replace_case_insensitive("Hello WORLD hello", "hello", "hi");
        assert_eq!(result, "hi WORLD hi");
    }

    #[test]
    fn search_and_replace_finds_matches_on_any_line_not_just_the_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n// TODO: fix a\nfn b() {}\n// TODO: fix b\n").unwrap();
        std::fs::write(dir.path().join("c.rs"), "fn c() {}\n// TODO: fix c\n").unwrap();

        let handle = crate::index_workspace(dir.path()).unwrap();
        let options = SearchAndReplaceOptions { mode: SearchMode::Standard, case_sensitive: true, max_matches: 500 };
        let result = search_and_replace(&handle, dir.path(), "TODO:", "FIXME:", &options, true).unwrap();

        let total_replacements: usize = result.plan.files.iter().map(|f| f.edits.len()).sum();
        assert_eq!(total_replacements, 3);
        assert_eq!(result.plan.files.len(), 2);
    }

    #[test]
    fn search_and_replace_applies_rewrites_matching_lines_preserving_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n// TODO: fix a\nfn b() {}\n// TODO: fix b\n").unwrap();

        let handle = crate::index_workspace(dir.path()).unwrap();
        let options = SearchAndReplaceOptions { mode: SearchMode::Standard, case_sensitive: true, max_matches: 500 };
        let result = search_and_replace(&handle, dir.path(), "TODO:", "FIXME:", &options, false).unwrap();
        assert!(result.applied.iter().all(|a| a.applied));

        let content = std::fs::read_to_string(dir.path().join("a.rs")).unwrap();
        assert_eq!(content, "fn a() {}\n// FIXME: fix a\nfn b() {}\n// FIXME: fix b\n");
    }
}

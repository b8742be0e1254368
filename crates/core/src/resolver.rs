//! Reference Resolver (C8) — `find_references`, backed by the symbol DB's
//! identifier table (`store::find_occurrences`), not by text search, so
//! results are AST-validated per §4.8.

use crate::error::CoreResult;
use crate::store::WorkspaceHandle;
use crate::types::{ReferenceRole, ResolvedReference};

use std::fs;

/// Resolve every recorded occurrence of `name` across the workspace into a
/// `ResolvedReference`, attaching a source-line snippet and a refined
/// `reference_type` derived from the occurrence's role plus its surrounding
/// line text.
pub fn find_references(
    handle: &WorkspaceHandle,
    workspace_root: &std::path::Path,
    name: &str,
    case_sensitive: bool,
) -> CoreResult<Vec<ResolvedReference>> {
    let occurrences = handle.find_occurrences(name, case_sensitive)?;

    let mut resolved = Vec::with_capacity(occurrences.len());
    for occ in occurrences {
        let snippet = read_line(workspace_root, &occ.file_path, occ.start_line).unwrap_or_default();
        let reference_type = classify_reference_type(occ.role, &snippet);
        resolved.push(ResolvedReference { occurrence: occ, reference_type, snippet });
    }
    Ok(resolved)
}

fn read_line(workspace_root: &std::path::Path, rel_path: &str, line: usize) -> Option<String> {
    let content = fs::read_to_string(workspace_root.join(rel_path)).ok()?;
    content.lines().nth(line.saturating_sub(1)).map(|l| l.trim().to_string())
}

/// Refine a stored role into the finer-grained label §6's tool contract
/// asks for, using regex-free substring rules on the line the occurrence
/// appears on: an assignment target reads as a "declaration", an import
/// statement as "import", a call as "call", anything else keeps its role.
pub fn classify_reference_type(role: ReferenceRole, line: &str) -> &'static str {
    let trimmed = line.trim_start();

    if role == ReferenceRole::Import {
        return "import";
    }

    let declares = ["let ", "const ", "var ", "fn ", "struct ", "class ", "type ", "interface "];
    if declares.iter().any(|kw| trimmed.starts_with(kw)) {
        return "declaration";
    }

    if role == ReferenceRole::Call {
        return "call";
    }

    if role == ReferenceRole::TypeUse {
        return "type-use";
    }

    "reference"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_role_is_always_import() {
        assert_eq!(classify_reference_type(ReferenceRole::Import, "use foo::Bar;"), "import");
    }

    #[test]
    fn declaration_keyword_overrides_reference_role() {
        assert_eq!(classify_reference_type(ReferenceRole::Reference, "let helper = 1;"), "declaration");
    }

    #[test]
    fn call_role_with_call_syntax_is_call() {
        assert_eq!(classify_reference_type(ReferenceRole::Call, "    helper(1, 2);"), "call");
    }

    #[test]
    fn type_use_role_stays_type_use() {
        assert_eq!(classify_reference_type(ReferenceRole::TypeUse, "let x: Helper = Helper::new();"), "type-use");
    }

    #[test]
    fn plain_reference_falls_through() {
        assert_eq!(classify_reference_type(ReferenceRole::Reference, "return helper;"), "reference");
    }
}

//! Structural code graph (call, type-ref, extends/implements) and the
//! byte-span identifier occurrences that back the Reference Resolver (C8).
//!
//! Builds on top of the AST index (tree-sitter) and import graph to connect
//! symbols across files. Every occurrence this module records carries a byte
//! span so `find_references` and the refactor executor (C7) never fall back
//! to line/column guessing.

use crate::ast::AstIndex;
use crate::scan::ImportGraph;
use crate::types::{IdentifierOccurrence, ReferenceRole, SymbolKind};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

// ---------------------------------------------------------------------------
// Structural edges (symbol -> symbol), used by dependency-style queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Import,
    Call,
    TypeRef,
    Extends,
    Implements,
}

impl EdgeKind {
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::Import => "import",
            EdgeKind::Call => "call",
            EdgeKind::TypeRef => "type_ref",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeEdge {
    pub from_file: String,
    pub from_symbol: String,
    pub to_file: String,
    pub to_symbol: String,
    pub kind: EdgeKind,
}

/// Structural code graph with forward and reverse indices, plus the raw
/// identifier occurrences (byte-span addressed) that produced each edge.
#[derive(Default)]
pub struct CodeGraph {
    pub edges: Vec<CodeEdge>,
    pub occurrences: Vec<IdentifierOccurrence>,
    by_source: HashMap<String, Vec<usize>>,
    by_target: HashMap<String, Vec<usize>>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_edge(&mut self, edge: CodeEdge) {
        let idx = self.edges.len();
        self.by_source.entry(edge.from_file.clone()).or_default().push(idx);
        self.by_target.entry(edge.to_file.clone()).or_default().push(idx);
        self.edges.push(edge);
    }

    pub fn edges_from(&self, file: &str, kind: Option<EdgeKind>) -> Vec<&CodeEdge> {
        self.by_source
            .get(file)
            .map(|idxs| {
                idxs.iter()
                    .filter_map(|&i| {
                        let e = &self.edges[i];
                        (kind.is_none() || Some(e.kind) == kind).then_some(e)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn edges_to(&self, file: &str, kind: Option<EdgeKind>) -> Vec<&CodeEdge> {
        self.by_target
            .get(file)
            .map(|idxs| {
                idxs.iter()
                    .filter_map(|&i| {
                        let e = &self.edges[i];
                        (kind.is_none() || Some(e.kind) == kind).then_some(e)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All occurrences of a given name, across the whole workspace — the raw
    /// material for `find_references`.
    pub fn occurrences_of<'a>(&'a self, name: &str) -> Vec<&'a IdentifierOccurrence> {
        self.occurrences.iter().filter(|o| o.name == name).collect()
    }
}

// ---------------------------------------------------------------------------
// Symbol resolution
// ---------------------------------------------------------------------------

struct SymbolLocation {
    file: String,
    name: String,
    kind: SymbolKind,
}

fn build_symbol_lookup(ast_index: &AstIndex) -> HashMap<String, Vec<SymbolLocation>> {
    let mut lookup: HashMap<String, Vec<SymbolLocation>> = HashMap::new();
    for (file_path, file_ast) in ast_index {
        for sym in &file_ast.symbols {
            lookup.entry(sym.name.clone()).or_default().push(SymbolLocation {
                file: file_path.clone(),
                name: sym.name.clone(),
                kind: sym.kind,
            });
        }
    }
    lookup
}

/// Resolve a symbol name to a definition site, preferring: same file, then
/// an imported file, then the nearest file by shared directory prefix.
fn resolve_symbol<'a>(
    name: &str,
    from_file: &str,
    imported_files: &HashSet<&str>,
    lookup: &'a HashMap<String, Vec<SymbolLocation>>,
    kind_filter: Option<SymbolKind>,
) -> Option<&'a SymbolLocation> {
    let candidates = lookup.get(name)?;
    let filtered: Vec<&SymbolLocation> = match kind_filter {
        Some(kind) => candidates.iter().filter(|c| c.kind == kind).collect(),
        None => candidates.iter().collect(),
    };
    if filtered.is_empty() {
        return None;
    }
    if let Some(loc) = filtered.iter().find(|c| c.file == from_file) {
        return Some(loc);
    }
    if let Some(loc) = filtered.iter().find(|c| imported_files.contains(c.file.as_str())) {
        return Some(loc);
    }
    let from_dir = from_file.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let mut best: Option<&SymbolLocation> = None;
    let mut best_score = 0usize;
    for loc in &filtered {
        let loc_dir = loc.file.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let score = from_dir.chars().zip(loc_dir.chars()).take_while(|(a, b)| a == b).count();
        if best.is_none() || score > best_score {
            best = Some(loc);
            best_score = score;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Edge and occurrence extraction
// ---------------------------------------------------------------------------

fn language_for_ext(ext: &str) -> Option<Language> {
    match ext {
        "rs" => Some(tree_sitter_rust::LANGUAGE.into()),
        "ts" | "tsx" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "py" | "pyi" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" | "h" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

struct CallSite<'a> {
    name: String,
    node: Node<'a>,
}

fn extract_callee_name(node: &Node, source: &[u8]) -> Option<String> {
    let func_node = node
        .child_by_field_name("function")
        .or_else(|| node.child_by_field_name("name"))
        .or_else(|| node.child_by_field_name("method"))?;
    let text = func_node.utf8_text(source).ok()?.trim().to_string();
    let name = text
        .rsplit_once("::")
        .map(|(_, n)| n)
        .or_else(|| text.rsplit_once('.').map(|(_, n)| n))
        .unwrap_or(&text);
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(name.to_string())
}

fn is_primitive_type(name: &str) -> bool {
    matches!(
        name,
        "bool" | "i8" | "i16" | "i32" | "i64" | "i128" | "u8" | "u16" | "u32" | "u64" | "u128"
            | "f32" | "f64" | "usize" | "isize" | "str" | "char" | "String" | "Vec" | "Option"
            | "Result" | "Box" | "Arc" | "Rc" | "Self" | "int" | "float" | "double" | "void"
            | "string" | "number" | "boolean" | "any" | "never" | "undefined" | "null"
            | "object" | "None" | "True" | "False"
    )
}

fn collect_type_refs<'a>(node: &Node<'a>, source: &[u8], out: &mut Vec<(String, Node<'a>)>) {
    let kind = node.kind();
    let looks_like_type = kind == "type_identifier"
        || (kind == "identifier"
            && node
                .parent()
                .map(|p| {
                    p.kind().contains("type") || p.kind() == "type_annotation" || p.kind() == "return_type"
                })
                .unwrap_or(false));
    if looks_like_type {
        if let Ok(text) = node.utf8_text(source) {
            let name = text.trim().to_string();
            if !name.is_empty()
                && !is_primitive_type(&name)
                && name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
            {
                out.push((name, *node));
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_type_refs(&child, source, out);
    }
}

fn extract_inheritance<'a>(node: &Node<'a>, source: &[u8], ext: &str) -> Vec<(String, EdgeKind, Node<'a>)> {
    let mut results = Vec::new();
    let kind = node.kind();
    match ext {
        "ts" | "tsx" | "js" | "jsx" | "java" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if matches!(child.kind(), "class_heritage" | "extends_clause" | "heritage") {
                    let mut inner = child.walk();
                    for grandchild in child.children(&mut inner) {
                        match grandchild.kind() {
                            "extends_clause" => {
                                let mut ec = grandchild.walk();
                                for ggg in grandchild.children(&mut ec) {
                                    if matches!(ggg.kind(), "type_identifier" | "identifier") {
                                        if let Ok(text) = ggg.utf8_text(source) {
                                            let t = text.trim().to_string();
                                            if !t.is_empty() && !results.iter().any(|(n, _, _)| n == &t) {
                                                results.push((t, EdgeKind::Extends, ggg));
                                            }
                                        }
                                    }
                                }
                            }
                            "implements_clause" => {
                                let mut ec = grandchild.walk();
                                for ggg in grandchild.children(&mut ec) {
                                    if matches!(ggg.kind(), "type_identifier" | "identifier") {
                                        if let Ok(text) = ggg.utf8_text(source) {
                                            let t = text.trim().to_string();
                                            if !t.is_empty() {
                                                results.push((t, EdgeKind::Implements, ggg));
                                            }
                                        }
                                    }
                                }
                            }
                            "type_identifier" | "identifier" => {
                                if let Ok(text) = grandchild.utf8_text(source) {
                                    let t = text.trim().to_string();
                                    if !t.is_empty() && !results.iter().any(|(n, _, _)| n == &t) {
                                        results.push((t, EdgeKind::Extends, grandchild));
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        "py" | "pyi" => {
            if kind == "class_definition" {
                if let Some(args) = node.child_by_field_name("superclasses") {
                    let mut cursor = args.walk();
                    for child in args.children(&mut cursor) {
                        if matches!(child.kind(), "identifier" | "attribute") {
                            if let Ok(text) = child.utf8_text(source) {
                                let name = text.rsplit_once('.').map(|(_, n)| n).unwrap_or(text).trim().to_string();
                                if !name.is_empty() && name != "object" {
                                    results.push((name, EdgeKind::Extends, child));
                                }
                            }
                        }
                    }
                }
            }
        }
        "rs" => {
            if kind == "impl_item" {
                if let Some(trait_node) = node.child_by_field_name("trait") {
                    if let Ok(text) = trait_node.utf8_text(source) {
                        results.push((text.trim().to_string(), EdgeKind::Implements, trait_node));
                    }
                }
            }
        }
        _ => {}
    }
    results
}

fn collect_calls<'a>(node: &Node<'a>, source: &[u8], calls: &mut Vec<CallSite<'a>>) {
    if matches!(node.kind(), "call_expression" | "call" | "method_invocation") {
        if let Some(name) = extract_callee_name(node, source) {
            calls.push(CallSite { name, node: *node });
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_calls(&child, source, calls);
    }
}

fn occurrence_of(name: String, role: ReferenceRole, file: &str, node: &Node) -> IdentifierOccurrence {
    let start = node.start_position();
    let end = node.end_position();
    IdentifierOccurrence {
        name,
        role,
        file_path: file.to_string(),
        start_line: start.row + 1,
        end_line: end.row + 1,
        start_column: start.column + 1,
        end_column: end.column + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

/// Find the tree-sitter node whose definition best matches a 1-based source
/// line (used to relocate a symbol's AST node from `ast::RawSymbol.start_line`).
fn find_node_at_line<'a>(root: &Node<'a>, target_line: usize) -> Option<Node<'a>> {
    let target_row = target_line.saturating_sub(1);
    find_deepest_at_row(root, target_row)
}

fn find_deepest_at_row<'a>(node: &Node<'a>, target_row: usize) -> Option<Node<'a>> {
    if node.start_position().row != target_row {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.start_position().row <= target_row && child.end_position().row >= target_row {
                if let Some(found) = find_deepest_at_row(&child, target_row) {
                    return Some(found);
                }
            }
        }
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.start_position().row == target_row && child.is_named() {
            let ck = child.kind();
            if ["function", "class", "struct", "impl", "trait", "enum", "method", "type"]
                .iter()
                .any(|s| ck.contains(s))
            {
                return Some(child);
            }
        }
    }
    Some(*node)
}

/// Build the structural code graph (edges + byte-span occurrences) for a set
/// of files. `files` is `(rel_path, abs_path)` pairs.
pub fn build_code_graph(
    ast_index: &AstIndex,
    import_graph: &ImportGraph,
    files: &[(String, std::path::PathBuf)],
) -> CodeGraph {
    let start = std::time::Instant::now();
    let mut graph = CodeGraph::new();
    let symbol_lookup = build_symbol_lookup(ast_index);

    for (rel_path, abs_path) in files {
        let ext = rel_path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        let Some(lang) = language_for_ext(ext) else { continue };
        let Ok(content) = std::fs::read_to_string(abs_path) else { continue };
        let Some(file_ast) = ast_index.get(rel_path.as_str()) else { continue };

        let imported_files: HashSet<&str> = import_graph
            .imports
            .get(rel_path.as_str())
            .map(|v| v.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();

        let mut parser = Parser::new();
        if parser.set_language(&lang).is_err() {
            continue;
        }
        let Some(tree) = parser.parse(&content, None) else { continue };
        let source = content.as_bytes();

        for sym in &file_ast.symbols {
            if matches!(sym.kind, SymbolKind::Class | SymbolKind::Struct | SymbolKind::Interface) {
                if let Some(node) = find_node_at_line(&tree.root_node(), sym.start_line) {
                    for (parent_name, edge_kind, name_node) in extract_inheritance(&node, source, ext) {
                        let role = match edge_kind {
                            EdgeKind::Implements => ReferenceRole::TypeUse,
                            _ => ReferenceRole::TypeUse,
                        };
                        graph.occurrences.push(occurrence_of(parent_name.clone(), role, rel_path, &name_node));

                        let type_kinds = [SymbolKind::Class, SymbolKind::Struct, SymbolKind::Interface];
                        for tk in &type_kinds {
                            if let Some(target) =
                                resolve_symbol(&parent_name, rel_path, &imported_files, &symbol_lookup, Some(*tk))
                            {
                                if target.file != *rel_path || target.name != sym.name {
                                    graph.push_edge(CodeEdge {
                                        from_file: rel_path.clone(),
                                        from_symbol: sym.name.clone(),
                                        to_file: target.file.clone(),
                                        to_symbol: target.name.clone(),
                                        kind: edge_kind,
                                    });
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            if matches!(sym.kind, SymbolKind::Function | SymbolKind::Method) {
                if let Some(node) = find_node_at_line(&tree.root_node(), sym.start_line) {
                    let mut calls = Vec::new();
                    if let Some(body) = node.child_by_field_name("body") {
                        collect_calls(&body, source, &mut calls);
                    } else {
                        collect_calls(&node, source, &mut calls);
                    }

                    let mut seen_calls = HashSet::new();
                    for call in calls {
                        if call.name == sym.name || !seen_calls.insert(call.name.clone()) {
                            continue;
                        }
                        graph.occurrences.push(occurrence_of(
                            call.name.clone(),
                            ReferenceRole::Call,
                            rel_path,
                            &call.node,
                        ));
                        let callable_kinds = [SymbolKind::Function, SymbolKind::Method];
                        for ck in &callable_kinds {
                            if let Some(target) =
                                resolve_symbol(&call.name, rel_path, &imported_files, &symbol_lookup, Some(*ck))
                            {
                                graph.push_edge(CodeEdge {
                                    from_file: rel_path.clone(),
                                    from_symbol: sym.name.clone(),
                                    to_file: target.file.clone(),
                                    to_symbol: target.name.clone(),
                                    kind: EdgeKind::Call,
                                });
                                break;
                            }
                        }
                    }

                    let mut type_refs = Vec::new();
                    collect_type_refs(&node, source, &mut type_refs);
                    let mut seen_types = HashSet::new();
                    for (type_name, type_node) in type_refs {
                        if !seen_types.insert(type_name.clone()) {
                            continue;
                        }
                        graph.occurrences.push(occurrence_of(
                            type_name.clone(),
                            ReferenceRole::TypeUse,
                            rel_path,
                            &type_node,
                        ));
                        let type_kinds = [
                            SymbolKind::Struct,
                            SymbolKind::Class,
                            SymbolKind::Enum,
                            SymbolKind::Interface,
                            SymbolKind::TypeAlias,
                        ];
                        for tk in &type_kinds {
                            if let Some(target) =
                                resolve_symbol(&type_name, rel_path, &imported_files, &symbol_lookup, Some(*tk))
                            {
                                if target.file != *rel_path || target.name != sym.name {
                                    graph.push_edge(CodeEdge {
                                        from_file: rel_path.clone(),
                                        from_symbol: sym.name.clone(),
                                        to_file: target.file.clone(),
                                        to_symbol: target.name.clone(),
                                        kind: EdgeKind::TypeRef,
                                    });
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    debug!(
        edges = graph.edges.len(),
        occurrences = graph.occurrences.len(),
        time_ms = start.elapsed().as_millis() as u64,
        "code graph built"
    );

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use std::collections::BTreeMap;

    fn make_import_graph(edges: &[(&str, &str)]) -> ImportGraph {
        let mut imports: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut imported_by: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, to) in edges {
            imports.entry(from.to_string()).or_default().push(to.to_string());
            imported_by.entry(to.to_string()).or_default().push(from.to_string());
        }
        ImportGraph { imports, imported_by }
    }

    #[test]
    fn call_graph_same_file() {
        let src = "fn helper() -> i32 {\n    42\n}\n\nfn main() {\n    let x = helper();\n    println!(\"{}\", x);\n}\n";
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("main.rs");
        std::fs::write(&file_path, src).unwrap();

        let mut ast_index = AstIndex::new();
        ast_index.insert("main.rs".to_string(), ast::parse_file(src, "rs", "main.rs").unwrap());

        let import_graph = make_import_graph(&[]);
        let files = vec![("main.rs".to_string(), file_path)];
        let graph = build_code_graph(&ast_index, &import_graph, &files);

        assert!(graph
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Call && e.from_symbol == "main" && e.to_symbol == "helper"));
        assert!(graph.occurrences_of("helper").iter().any(|o| o.role == ReferenceRole::Call));
    }

    #[test]
    fn call_graph_cross_file() {
        let main_src = "fn main() {\n    run();\n}\n";
        let app_src = "pub fn run() {\n    println!(\"running\");\n}\n";

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let main_path = dir.path().join("src/main.rs");
        let app_path = dir.path().join("src/app.rs");
        std::fs::write(&main_path, main_src).unwrap();
        std::fs::write(&app_path, app_src).unwrap();

        let mut ast_index = AstIndex::new();
        ast_index.insert("src/main.rs".to_string(), ast::parse_file(main_src, "rs", "src/main.rs").unwrap());
        ast_index.insert("src/app.rs".to_string(), ast::parse_file(app_src, "rs", "src/app.rs").unwrap());

        let import_graph = make_import_graph(&[("src/main.rs", "src/app.rs")]);
        let files = vec![("src/main.rs".to_string(), main_path), ("src/app.rs".to_string(), app_path)];
        let graph = build_code_graph(&ast_index, &import_graph, &files);

        assert!(graph.edges.iter().any(|e| e.from_file == "src/main.rs"
            && e.from_symbol == "main"
            && e.to_file == "src/app.rs"
            && e.to_symbol == "run"));
    }

    #[test]
    fn extends_edge_detected() {
        let src = "export class Animal {\n    name: string;\n}\n\nexport class Dog extends Animal {\n    bark(): string { return \"woof\"; }\n}\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("animals.ts");
        std::fs::write(&path, src).unwrap();

        let mut ast_index = AstIndex::new();
        ast_index.insert("animals.ts".to_string(), ast::parse_file(src, "ts", "animals.ts").unwrap());
        let import_graph = make_import_graph(&[]);
        let files = vec![("animals.ts".to_string(), path)];
        let graph = build_code_graph(&ast_index, &import_graph, &files);

        assert!(graph
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Extends && e.from_symbol == "Dog" && e.to_symbol == "Animal"));
    }

    #[test]
    fn edge_queries_filter_by_kind() {
        let mut graph = CodeGraph::new();
        graph.push_edge(CodeEdge {
            from_file: "a.rs".into(),
            from_symbol: "main".into(),
            to_file: "b.rs".into(),
            to_symbol: "run".into(),
            kind: EdgeKind::Call,
        });
        graph.push_edge(CodeEdge {
            from_file: "a.rs".into(),
            from_symbol: "main".into(),
            to_file: "c.rs".into(),
            to_symbol: "Config".into(),
            kind: EdgeKind::TypeRef,
        });

        assert_eq!(graph.edges_from("a.rs", None).len(), 2);
        assert_eq!(graph.edges_from("a.rs", Some(EdgeKind::Call)).len(), 1);
        assert_eq!(graph.edges_to("b.rs", None).len(), 1);
        assert!(graph.edges_to("d.rs", None).is_empty());
    }
}

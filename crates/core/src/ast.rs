//! The in-process ingestion producer (C10): tree-sitter AST parsing that turns
//! source files into [`types::Symbol`] records for the symbol database (C1).
//!
//! Feature-gated behind `treesitter` to keep a minimal build lean. Extracts
//! function, class, struct, trait, enum, and method definitions across 8
//! languages with exact line/column/byte spans — the byte spans are what let
//! the Reference Resolver (C8) and Refactor Executor (C7) work without ever
//! falling back to regex for correctness.

use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use crate::types::{ScannedFile, SymbolKind, Visibility};

// ---------------------------------------------------------------------------
// Per-file AST index
// ---------------------------------------------------------------------------

/// A symbol as extracted during the walk, before `containing_symbol` names
/// have been resolved from parent indices.
#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub language: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub visibility: Visibility,
    pub signature: String,
    pub doc_comment: Option<String>,
    /// Index of parent symbol (e.g., method's class/impl), or None for top-level.
    pub parent_idx: Option<usize>,
}

impl RawSymbol {
    pub fn into_symbol(self, containing_symbol: Option<String>) -> crate::types::Symbol {
        crate::types::Symbol {
            name: self.name,
            kind: self.kind,
            language: self.language,
            file_path: self.file_path,
            start_line: self.start_line,
            end_line: self.end_line,
            start_column: self.start_column,
            end_column: self.end_column,
            start_byte: self.start_byte,
            end_byte: self.end_byte,
            visibility: self.visibility,
            signature: self.signature,
            containing_symbol,
            doc_comment: self.doc_comment,
        }
    }
}

/// All symbols extracted from a single file.
#[derive(Debug, Clone, Default)]
pub struct FileAst {
    pub symbols: Vec<RawSymbol>,
    /// Name → indices into `symbols` for fast lookup.
    pub name_index: HashMap<String, Vec<usize>>,
}

impl FileAst {
    fn push(&mut self, sym: RawSymbol) {
        let idx = self.symbols.len();
        self.name_index.entry(sym.name.clone()).or_default().push(idx);
        self.symbols.push(sym);
    }

    pub fn find(&self, name: &str) -> Vec<&RawSymbol> {
        self.name_index
            .get(name)
            .map(|indices| indices.iter().map(|&i| &self.symbols[i]).collect())
            .unwrap_or_default()
    }

    /// Resolve `parent_idx` into the parent's name for each symbol, producing
    /// the fully-shaped `types::Symbol` records the symbol DB stores.
    pub fn into_symbols(self) -> Vec<crate::types::Symbol> {
        let names: Vec<String> = self.symbols.iter().map(|s| s.name.clone()).collect();
        self.symbols
            .into_iter()
            .map(|s| {
                let containing = s.parent_idx.and_then(|i| names.get(i).cloned());
                s.into_symbol(containing)
            })
            .collect()
    }
}

/// Per-file AST index for the entire workspace, keyed by relative path.
pub type AstIndex = HashMap<String, FileAst>;

// ---------------------------------------------------------------------------
// Language resolution
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

pub fn language_tag(ext: &str) -> &'static str {
    match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" | "pyi" => "python",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "java" => "java",
        _ => "unknown",
    }
}

fn is_rust(ext: &str) -> bool {
    ext == "rs"
}
fn is_c_cpp(ext: &str) -> bool {
    matches!(ext, "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx")
}
fn is_python(ext: &str) -> bool {
    matches!(ext, "py" | "pyi")
}
fn is_go(ext: &str) -> bool {
    ext == "go"
}

// ---------------------------------------------------------------------------
// Symbol classification
// ---------------------------------------------------------------------------

fn classify_node(kind: &str, _ext: &str) -> Option<SymbolKind> {
    match kind {
        "function_item" => Some(SymbolKind::Function),
        "struct_item" => Some(SymbolKind::Struct),
        "enum_item" => Some(SymbolKind::Enum),
        "trait_item" => Some(SymbolKind::Interface),
        "impl_item" => Some(SymbolKind::Class),
        "type_item" => Some(SymbolKind::TypeAlias),
        "const_item" => Some(SymbolKind::Constant),
        "static_item" => Some(SymbolKind::Constant),

        "function_declaration" => Some(SymbolKind::Function),
        "class_declaration" => Some(SymbolKind::Class),
        "interface_declaration" => Some(SymbolKind::Interface),
        "type_alias_declaration" => Some(SymbolKind::TypeAlias),
        "method_definition" => Some(SymbolKind::Method),
        "export_statement" => None,

        "function_definition" => Some(SymbolKind::Function),
        "class_definition" => Some(SymbolKind::Class),

        "method_declaration" => Some(SymbolKind::Method),
        "type_declaration" => None,
        "type_spec" => Some(SymbolKind::TypeAlias),

        "struct_specifier" => Some(SymbolKind::Struct),
        "enum_specifier" => Some(SymbolKind::Enum),
        "class_specifier" => Some(SymbolKind::Class),

        "enum_declaration" => Some(SymbolKind::Enum),

        _ => None,
    }
}

fn extract_name<'a>(node: &Node<'a>, source: &'a [u8], ext: &str) -> Option<String> {
    for field in &["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(*field) {
            if let Ok(text) = name_node.utf8_text(source) {
                let name = text.trim().to_string();
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }

    if node.kind() == "impl_item" && is_rust(ext) {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Ok(text) = type_node.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if node.kind() == "type_spec" && is_go(ext) {
        if let Some(child) = node.named_child(0) {
            if let Ok(text) = child.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if (node.kind() == "function_definition" && is_c_cpp(ext)) || node.kind() == "function_item" {
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(name_node) = decl.child_by_field_name("declarator") {
                if let Ok(text) = name_node.utf8_text(source) {
                    return Some(text.trim().to_string());
                }
            }
            if let Ok(text) = decl.utf8_text(source) {
                let s = text.trim();
                if let Some(paren) = s.find('(') {
                    return Some(s[..paren].trim().to_string());
                }
                return Some(s.to_string());
            }
        }
    }

    None
}

/// Build a one-line signature from a node, stripping the body.
fn extract_signature(node: &Node, source: &[u8], ext: &str) -> String {
    let text = node.utf8_text(source).unwrap_or("");
    let first_line = text.lines().next().unwrap_or("").trim();

    let sig = if is_python(ext) {
        if let Some(colon) = first_line.find(':') {
            &first_line[..=colon]
        } else {
            first_line
        }
    } else if let Some(brace) = first_line.find('{') {
        first_line[..brace].trim()
    } else {
        first_line
    };

    if sig.len() > 200 {
        format!("{}...", &sig[..sig.floor_char_boundary(200)])
    } else {
        sig.to_string()
    }
}

/// Visibility inferred from the signature text, per-language convention.
/// Purely lexical — good enough for ranking/filtering, not a type-checker.
fn infer_visibility(signature: &str, name: &str, ext: &str) -> Visibility {
    let sig = signature.trim_start();
    if is_python(ext) {
        return if name.starts_with('_') { Visibility::Private } else { Visibility::Public };
    }
    if is_rust(ext) {
        if sig.starts_with("pub(crate)") {
            return Visibility::Internal;
        }
        return if sig.starts_with("pub ") || sig.starts_with("pub(") {
            Visibility::Public
        } else {
            Visibility::Private
        };
    }
    if sig.starts_with("private ") {
        return Visibility::Private;
    }
    if sig.starts_with("protected ") {
        return Visibility::Protected;
    }
    if sig.starts_with("internal ") {
        return Visibility::Internal;
    }
    // JS/TS/Go/Java/C++: exported/public by default absent an explicit modifier.
    Visibility::Public
}

/// A doc comment is a contiguous run of `comment` nodes immediately preceding
/// this node, with no blank line in between. Returned as the joined text.
fn extract_doc_comment(node: &Node, source: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut cursor = node.prev_sibling();
    while let Some(sib) = cursor {
        if sib.kind().contains("comment") {
            if let Ok(text) = sib.utf8_text(source) {
                lines.push(text.trim().to_string());
            }
            cursor = sib.prev_sibling();
        } else {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn walk_node(
    node: &Node,
    source: &[u8],
    ext: &str,
    rel_path: &str,
    parent_idx: Option<usize>,
    file_ast: &mut FileAst,
) {
    let kind = node.kind();

    if let Some(sym_kind) = classify_node(kind, ext) {
        let name = extract_name(node, source, ext).unwrap_or_default();
        let start_pos = node.start_position();
        let end_pos = node.end_position();
        let signature = extract_signature(node, source, ext);

        let final_kind = if parent_idx.is_some()
            && matches!(sym_kind, SymbolKind::Function)
            && !is_go(ext)
        {
            SymbolKind::Method
        } else {
            sym_kind
        };

        let sym = RawSymbol {
            name: name.clone(),
            kind: final_kind,
            language: language_tag(ext).to_string(),
            file_path: rel_path.to_string(),
            start_line: start_pos.row + 1,
            end_line: end_pos.row + 1,
            start_column: start_pos.column + 1,
            end_column: end_pos.column + 1,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            visibility: infer_visibility(&signature, &name, ext),
            signature,
            doc_comment: extract_doc_comment(node, source),
            parent_idx,
        };
        let my_idx = file_ast.symbols.len();
        file_ast.push(sym);

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, rel_path, Some(my_idx), file_ast);
        }
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, rel_path, parent_idx, file_ast);
        }
    }
}

/// Parse a single file and extract its AST symbols. Returns `None` if the
/// file's language isn't supported or parsing fails.
pub fn parse_file(content: &str, ext: &str, rel_path: &str) -> Option<FileAst> {
    let lang = language_for_ext(ext)?;
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;

    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut file_ast = FileAst::default();
    let source = content.as_bytes();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        walk_node(&child, source, ext, rel_path, None, &mut file_ast);
    }

    if file_ast.symbols.is_empty() {
        None
    } else {
        Some(file_ast)
    }
}

/// Build an AST index for all supported files in parallel.
pub fn build_ast_index(files: &[ScannedFile]) -> AstIndex {
    let start = std::time::Instant::now();

    let results: Vec<(String, FileAst)> = files
        .par_iter()
        .filter_map(|file| {
            let content = std::fs::read_to_string(&file.abs_path).ok()?;
            let ast = parse_file(&content, &file.ext, &file.rel_path)?;
            Some((file.rel_path.clone(), ast))
        })
        .collect();

    let count = results.len();
    let total_symbols: usize = results.iter().map(|(_, ast)| ast.symbols.len()).sum();
    let index: AstIndex = results.into_iter().collect();

    debug!(
        files = count,
        symbols = total_symbols,
        time_ms = start.elapsed().as_millis() as u64,
        "AST index built"
    );

    index
}

/// Re-parse a single file and update the AST index (used by the incremental
/// file-watcher path when a file changes on disk).
pub fn update_ast_for_file(
    index: &mut AstIndex,
    rel_path: &str,
    abs_path: &std::path::Path,
    ext: &str,
) {
    if let Ok(content) = std::fs::read_to_string(abs_path) {
        if let Some(ast) = parse_file(&content, ext, rel_path) {
            index.insert(rel_path.to_string(), ast);
            return;
        }
    }
    index.remove(rel_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rust_file_with_byte_spans() {
        let src = r#"
pub fn greet(name: &str) -> String {
    format!("Hello, {}!", name)
}

struct Config {
    name: String,
}
"#;
        let ast = parse_file(src, "rs", "src/lib.rs").expect("should parse");
        let greet = ast.find("greet");
        assert!(!greet.is_empty());
        let sym = greet[0];
        assert_eq!(sym.start_line, 2);
        assert_eq!(&src.as_bytes()[sym.start_byte..sym.start_byte + 2], b"pu");
        assert_eq!(sym.visibility, Visibility::Public);

        let structs = ast.find("Config");
        assert_eq!(structs[0].visibility, Visibility::Private);
    }

    #[test]
    fn doc_comment_is_captured() {
        let src = "/// Greets someone.\npub fn greet() {}\n";
        let ast = parse_file(src, "rs", "src/lib.rs").expect("should parse");
        let sym = &ast.find("greet")[0];
        assert_eq!(sym.doc_comment.as_deref(), Some("/// Greets someone."));
    }

    #[test]
    fn nested_symbols_resolve_containing_symbol() {
        let src = "impl Config {\n    pub fn new() -> Self { Config {} }\n}\n";
        let ast = parse_file(src, "rs", "src/lib.rs").expect("should parse");
        let symbols = ast.into_symbols();
        let new_fn = symbols.iter().find(|s| s.name == "new").unwrap();
        assert_eq!(new_fn.containing_symbol.as_deref(), Some("Config"));
    }

    #[test]
    fn python_underscore_is_private() {
        let src = "def _helper():\n    pass\n\ndef public_fn():\n    pass\n";
        let ast = parse_file(src, "py", "mod.py").expect("should parse");
        assert_eq!(ast.find("_helper")[0].visibility, Visibility::Private);
        assert_eq!(ast.find("public_fn")[0].visibility, Visibility::Public);
    }

    #[test]
    fn unknown_ext_returns_none() {
        assert!(parse_file("some text", "txt", "f.txt").is_none());
    }

    #[test]
    fn incremental_update_adds_and_removes() {
        let mut index = AstIndex::new();
        let src = "fn hello() {}\n";
        let ast = parse_file(src, "rs", "src/main.rs").unwrap();
        index.insert("src/main.rs".to_string(), ast);
        assert!(index.contains_key("src/main.rs"));
        index.remove("src/main.rs");
        assert!(!index.contains_key("src/main.rs"));
    }
}

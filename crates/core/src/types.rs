//! The data model of §3: documents, symbols, identifier occurrences, query
//! requests/results, and refactor plans. Shared by every component (C1-C9).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Utf8
    }
}

/// A single file record as the store knows it. Path is the primary key inside
/// a workspace.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub ext: String,
    pub language: String,
    pub size: u64,
    /// Seconds since epoch.
    pub last_modified: i64,
    pub encoding: Encoding,
}

// ---------------------------------------------------------------------------
// Symbol / identifier occurrence (C1 symbol DB, C8 reference resolver)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Class,
    Interface,
    Struct,
    Enum,
    Method,
    Function,
    Property,
    Field,
    Event,
    Namespace,
    Variable,
    TypeAlias,
    Constant,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Method => "method",
            SymbolKind::Function => "function",
            SymbolKind::Property => "property",
            SymbolKind::Field => "field",
            SymbolKind::Event => "event",
            SymbolKind::Namespace => "namespace",
            SymbolKind::Variable => "variable",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Constant => "constant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "class" => SymbolKind::Class,
            "interface" => SymbolKind::Interface,
            "struct" => SymbolKind::Struct,
            "enum" => SymbolKind::Enum,
            "method" => SymbolKind::Method,
            "function" => SymbolKind::Function,
            "property" => SymbolKind::Property,
            "field" => SymbolKind::Field,
            "event" => SymbolKind::Event,
            "namespace" => SymbolKind::Namespace,
            "variable" => SymbolKind::Variable,
            "type_alias" => SymbolKind::TypeAlias,
            "constant" => SymbolKind::Constant,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn label(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Internal => "internal",
        }
    }
}

/// A byte span `[start_byte, end_byte)` addressing an identifier in the
/// on-disk file bytes, per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSpan {
    pub start_byte: usize,
    pub end_byte: usize,
}

/// {name, kind, language, file-path, start/end line+column, start/end byte,
/// visibility, signature, containing-symbol?, doc-comment?} per §3.
///
/// Invariant: start <= end on both line and column axes. The byte span
/// addresses the identifier token itself, not the whole definition body.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub language: String,
    pub file_path: String,
    /// 1-based.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// 1-based.
    pub start_column: usize,
    pub end_column: usize,
    /// 0-based.
    pub start_byte: usize,
    pub end_byte: usize,
    pub visibility: Visibility,
    pub signature: String,
    pub containing_symbol: Option<String>,
    pub doc_comment: Option<String>,
}

impl Symbol {
    pub fn span(&self) -> ByteSpan {
        ByteSpan { start_byte: self.start_byte, end_byte: self.end_byte }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceRole {
    Reference,
    Call,
    TypeUse,
    Import,
}

impl ReferenceRole {
    pub fn label(&self) -> &'static str {
        match self {
            ReferenceRole::Reference => "reference",
            ReferenceRole::Call => "call",
            ReferenceRole::TypeUse => "type-use",
            ReferenceRole::Import => "import",
        }
    }
}

/// A non-definition reference: same shape as `Symbol` but tagged with a role
/// instead of a definition kind.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifierOccurrence {
    pub name: String,
    pub role: ReferenceRole,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// `find_references` result: an occurrence plus the finer-grained
/// `referenceType` the MCP tool contract in §6 asks for, derived from regex
/// rules on surrounding context (see `resolver::classify_reference_type`).
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedReference {
    pub occurrence: IdentifierOccurrence,
    pub reference_type: &'static str,
    pub snippet: String,
}

// ---------------------------------------------------------------------------
// Query request / result (C2, C3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    Auto,
    Exact,
    Fuzzy,
    Regex,
    Symbol,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub case_sensitive: bool,
    pub max_tokens: Option<usize>,
    pub no_cache: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { case_sensitive: false, max_tokens: None, no_cache: false }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub mode: QueryMode,
    pub text: String,
    pub workspace: PathBuf,
    pub options: QueryOptions,
}

/// One hit in a query result. Ordering is deterministic: score desc, then
/// path asc, then start_line asc (see `planner::sort_hits`).
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub snippet: Option<String>,
    /// Which tier produced this hit: "tier1" | "tier2" | "tier3" (semantic).
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub total: usize,
    pub hits: Vec<Hit>,
    pub elapsed_ms: u64,
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Refactor plan (C7)
// ---------------------------------------------------------------------------

/// One edit within a file, expressed as a byte-offset replacement. Edits
/// within a file are applied in a single write, sorted descending by
/// `start_byte` so earlier offsets stay valid as later ones are applied.
#[derive(Debug, Clone, Serialize)]
pub struct ByteEdit {
    pub start_byte: usize,
    pub end_byte: usize,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEditPlan {
    pub path: String,
    pub edits: Vec<ByteEdit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileApplyResult {
    pub path: String,
    pub applied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefactorPlan {
    pub operation: String,
    pub files: Vec<FileEditPlan>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefactorResult {
    pub operation: String,
    pub dry_run: bool,
    pub plan: RefactorPlan,
    pub applied: Vec<FileApplyResult>,
}

// ---------------------------------------------------------------------------
// Scan-time types (ingestion producer, C10) — carried from the teacher.
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub ext: String,
    pub size: u64,
    pub last_modified: i64,
}

/// Maximum file size (in bytes) read into memory during scanning/embedding.
pub const MAX_FILE_READ: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Session state — tracks what a caller has already read/searched, used by
// the Response Shaper to avoid re-spending budget on already-seen files.
// ---------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::time::Instant;

pub struct SessionState {
    pub files_read: HashMap<String, Instant>,
    pub total_tokens_served: usize,
    pub started_at: Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self { files_read: HashMap::new(), total_tokens_served: 0, started_at: Instant::now() }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&mut self, path: &str, tokens: usize) {
        self.files_read.insert(path.to_string(), Instant::now());
        self.total_tokens_served += tokens;
    }

    pub fn seen_paths(&self) -> HashSet<String> {
        self.files_read.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Path validation
// ---------------------------------------------------------------------------

use std::path::Path;

/// Validate and canonicalize a relative path, rejecting traversal attacks and
/// paths outside the workspace root.
pub fn validate_path(workspace_root: &Path, rel_path: &str) -> Result<PathBuf, &'static str> {
    if rel_path.is_empty() || rel_path.contains("..") || rel_path.starts_with('/') {
        return Err("Invalid path");
    }
    let full = workspace_root.join(rel_path);
    let canonical = full.canonicalize().map_err(|_| "File not found")?;
    let root_canonical = workspace_root.canonicalize().map_err(|_| "Root not found")?;
    if !canonical.starts_with(&root_canonical) {
        return Err("Path traversal detected");
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_path_rejects_traversal() {
        let root = Path::new("/tmp");
        let result = validate_path(root, "../etc/passwd");
        assert_eq!(result.unwrap_err(), "Invalid path");
    }

    #[test]
    fn validate_path_rejects_absolute_paths() {
        let root = Path::new("/tmp");
        let result = validate_path(root, "/etc/passwd");
        assert_eq!(result.unwrap_err(), "Invalid path");
    }

    #[test]
    fn symbol_span_matches_fields() {
        let sym = Symbol {
            name: "Foo".into(),
            kind: SymbolKind::Struct,
            language: "rust".into(),
            file_path: "src/lib.rs".into(),
            start_line: 1,
            end_line: 3,
            start_column: 12,
            end_column: 15,
            start_byte: 11,
            end_byte: 14,
            visibility: Visibility::Public,
            signature: "pub struct Foo".into(),
            containing_symbol: None,
            doc_comment: None,
        };
        assert_eq!(sym.span(), ByteSpan { start_byte: 11, end_byte: 14 });
    }
}

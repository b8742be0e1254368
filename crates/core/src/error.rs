//! The `CoreError` taxonomy and its mapping onto the tool envelope's error codes.
//!
//! Every fallible operation below the MCP dispatch boundary returns
//! `Result<T, CoreError>`. The dispatch boundary (in `codescope-mcp`) is the
//! only place that turns a `CoreError` into `{success, data?, error?}` JSON —
//! library code never constructs that envelope itself.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no index found for workspace {0}")]
    IndexNotFound(PathBuf),

    #[error("workspace {0} has not been indexed yet")]
    WorkspaceNotIndexed(PathBuf),

    #[error("index for {0} exists but failed to open: {1}")]
    IndexCorrupt(PathBuf, String),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("i/o error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("search failed: {0}")]
    SearchError(String),

    #[error("replace failed: {0}")]
    ReplaceFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("semantic search unavailable for this workspace")]
    SemanticUnavailable,

    #[error("target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("workspace {0} is not a git repository")]
    NotAGitRepo(PathBuf),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code for the tool envelope's `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::IndexNotFound(_) => "INDEX_NOT_FOUND",
            CoreError::WorkspaceNotIndexed(_) => "WORKSPACE_NOT_INDEXED",
            CoreError::IndexCorrupt(_, _) => "INDEX_NOT_FOUND",
            CoreError::SymbolNotFound(_) => "SYMBOL_NOT_FOUND",
            CoreError::InvalidQuery(_) => "INVALID_QUERY",
            CoreError::ValidationError(_) => "VALIDATION_ERROR",
            CoreError::FileNotFound(_) => "FILE_NOT_FOUND",
            CoreError::PermissionDenied(_) => "PERMISSION_DENIED",
            CoreError::Io { .. } => "INTERNAL_ERROR",
            CoreError::SearchError(_) => "SEARCH_ERROR",
            CoreError::ReplaceFailed(_) => "REPLACE_FAILED",
            CoreError::DeleteFailed(_) => "DELETE_FAILED",
            CoreError::SemanticUnavailable => "SEMANTIC_UNAVAILABLE",
            CoreError::TargetExists(_) => "VALIDATION_ERROR",
            CoreError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            CoreError::NotAGitRepo(_) => "SEARCH_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Suggested recovery steps surfaced on `error.recovery.steps`.
    pub fn recovery_steps(&self) -> Vec<String> {
        match self {
            CoreError::IndexNotFound(p) | CoreError::IndexCorrupt(p, _) => {
                vec![format!("run index_workspace(\"{}\")", p.display())]
            }
            CoreError::WorkspaceNotIndexed(p) => {
                vec![format!("run index_workspace(\"{}\") before querying", p.display())]
            }
            CoreError::SemanticUnavailable => {
                vec!["retry with mode=Auto or mode=Fuzzy instead of Semantic".into()]
            }
            CoreError::SymbolNotFound(name) => {
                vec![format!("check spelling of '{name}' or try text_search instead")]
            }
            CoreError::CircuitBreakerOpen(_) => {
                vec!["wait for the breaker to reset and retry".into()]
            }
            _ => vec![],
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

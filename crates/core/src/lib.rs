//! Core library: tiered code search, symbol database, and refactor engine.
//!
//! Wires the ingestion producer (scan -> AST -> import graph -> code graph)
//! into the workspace store, and re-exports the public surface the `mcp` and
//! `cli` crates build on.

pub mod ast;
pub mod cache;
pub mod config;
pub mod conventions;
pub mod error;
pub mod fileedit;
pub mod fuzzy;
pub mod git;
pub mod graph;
pub mod init;
pub mod planner;
pub mod refactor;
pub mod resolver;
pub mod scan;
pub mod scorer;
#[cfg(feature = "semantic")]
pub mod semantic;
pub mod shaper;
pub mod store;
pub mod stubs;
pub mod tokenizer;
pub mod types;
pub mod watch;

pub use error::{CoreError, CoreResult};
pub use store::WorkspaceHandle;

use config::WorkspaceConfig;
use std::path::Path;
use tracing::info;

/// Full (re-)index of a workspace: scan the filesystem, parse ASTs, resolve
/// imports, build the structural code graph, then rebuild the store's
/// inverted index and symbol database in one shot. This is what `cs index`
/// and a cold `cs serve` startup both call.
pub fn index_workspace(workspace: &Path) -> CoreResult<WorkspaceHandle> {
    let start = std::time::Instant::now();
    let config = WorkspaceConfig::load(workspace);

    let files = scan::scan_files(workspace, &config);
    let ast_index = ast::build_ast_index(&files);
    let import_graph = scan::scan_imports(&files);

    let graph_files: Vec<(String, std::path::PathBuf)> =
        files.iter().map(|f| (f.rel_path.clone(), f.abs_path.clone())).collect();
    let code_graph = graph::build_code_graph(&ast_index, &import_graph, &graph_files);

    let handle = store::open(workspace)?;
    handle.index_files(&files, &ast_index, &code_graph.occurrences)?;

    info!(
        files = files.len(),
        occurrences = code_graph.occurrences.len(),
        edges = code_graph.edges.len(),
        time_ms = start.elapsed().as_millis() as u64,
        "full workspace index built"
    );
    Ok(handle)
}

/// Open an existing store if present, otherwise perform a full index. Used by
/// `cs serve` so a first run doesn't require a separate `cs index` step.
pub fn open_or_index(workspace: &Path) -> CoreResult<WorkspaceHandle> {
    if store::exists(workspace) {
        store::open(workspace)
    } else {
        index_workspace(workspace)
    }
}

//! MCP transport layer — JSON-RPC 2.0 dispatch shared by the stdio and
//! streamable-HTTP bindings (§6.1). `dispatch_jsonrpc` is transport-agnostic;
//! `stdio::run` and `http::serve` are the two concrete bindings `serve()`
//! picks between.

mod envelope;
pub mod http;
pub mod stdio;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use codescope_core::cache::ResultCache;
use codescope_core::{CoreResult, WorkspaceHandle};
use serde_json::{json, Value};

/// Bounds the number of live cache entries (§4.5) — generous for a
/// single-workspace process, not meant to cap memory precisely.
const RESULT_CACHE_CAPACITY: usize = 2048;

pub(crate) const SUPPORTED_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18"];
pub(crate) const LATEST_VERSION: &str = "2025-11-25";

fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_VERSIONS.iter().find(|&&v| v == client_version).copied().unwrap_or(LATEST_VERSION)
}

/// Per-connection session state. The stdio transport keeps exactly one for
/// the lifetime of the process; the HTTP transport keys one per
/// `Mcp-Session-Id`.
#[derive(Debug, Default)]
pub struct Session {
    pub initialized: bool,
}

/// Everything a running server needs: the open workspace store and its root
/// path (refactor/git/fileedit operations need the root for path
/// resolution, the store alone isn't enough). Holds the live file watcher
/// so it keeps running for the lifetime of the context — dropping
/// `ServerContext` stops it.
pub struct ServerContext {
    pub handle: Arc<WorkspaceHandle>,
    pub root: PathBuf,
    /// Result Cache (C5, §4.5): shared across every `tools/call`, keyed by
    /// `{tool}:{canonical_params}`. Also backs the Response Shaper's
    /// resource-URI spill for truncated search results.
    pub cache: Arc<ResultCache<Value>>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl ServerContext {
    pub fn open(root: &Path) -> CoreResult<Self> {
        let handle = Arc::new(codescope_core::open_or_index(root)?);
        let watcher = codescope_core::watch::start_watcher(handle.clone(), root.to_path_buf());
        let cache = Arc::new(ResultCache::new(RESULT_CACHE_CAPACITY));
        Ok(Self { handle, root: root.to_path_buf(), cache, _watcher: watcher })
    }
}

/// Dispatch one parsed JSON-RPC request/notification. Returns `None` for
/// notifications (no `id`), matching the JSON-RPC 2.0 spec — nothing is
/// written back to the transport for those.
pub fn dispatch_jsonrpc(ctx: &ServerContext, msg: &Value, session: &mut Session) -> Option<Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();

    if id.is_none() || method.starts_with("notifications/") {
        return None;
    }

    let response = match method {
        "initialize" => {
            let client_version = msg["params"]["protocolVersion"].as_str().unwrap_or("");
            let negotiated = negotiate_version(client_version);
            session.initialized = true;
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": negotiated,
                    "capabilities": {
                        "tools": { "listChanged": false },
                        "resources": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": "codescope",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "instructions": "CodeScope — search, browse, and refactor source code. Start with cs_search for discovery. Use cs_read to read files, cs_find_references/cs_goto_definition to navigate, cs_smart_refactor to restructure, and cs_blame/cs_file_history/cs_hot_files for git context."
                }
            })
        }
        "tools/list" => {
            let tools: Vec<Value> = tools::tool_definitions()
                .into_iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "inputSchema": t.input_schema }))
                .collect();
            json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": tools } })
        }
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let arguments = msg["params"].get("arguments").cloned().unwrap_or_else(|| json!({}));
            let result = tools::call_tool(&ctx.handle, &ctx.root, &ctx.cache, tool_name, &arguments);

            let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string());
            // Never set isError: true -- it triggers Claude Code's sibling tool call
            // cascade failure (all parallel calls get killed). Prefix the message
            // instead so the LLM can still detect and recover from failures.
            let content_text = if result.success { text } else { format!("\u{26a0} Error: {text}") };

            let mut extension_data = serde_json::Map::new();
            if let Some(data) = &result.data {
                if data.get("truncated").and_then(Value::as_bool) == Some(true) {
                    extension_data.insert("truncated".into(), json!(true));
                }
            }

            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{ "type": "text", "text": content_text }],
                    "structuredContent": result,
                    "isError": false,
                    "_meta": { "extension_data": Value::Object(extension_data) }
                }
            })
        }
        "resources/list" => {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": conventions_resources() }
            })
        }
        "resources/read" => {
            let uri = msg["params"]["uri"].as_str().unwrap_or("");
            let result = if uri.starts_with("resource://") {
                read_spilled_resource(ctx, uri)
            } else {
                read_conventions_resource(ctx, uri)
            };
            match result {
                Ok(contents) => json!({ "jsonrpc": "2.0", "id": id, "result": contents }),
                Err(e) => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32602, "message": e } }),
            }
        }
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        _ => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "Method not found" } }),
    };

    Some(response)
}

fn conventions_resources() -> Vec<Value> {
    vec![
        json!({ "uri": "conventions://summary", "name": "Coding conventions summary", "mimeType": "text/plain" }),
        json!({ "uri": "conventions://errors", "name": "Error handling conventions", "mimeType": "text/plain" }),
        json!({ "uri": "conventions://naming", "name": "Naming conventions", "mimeType": "text/plain" }),
        json!({ "uri": "conventions://testing", "name": "Testing conventions", "mimeType": "text/plain" }),
    ]
}

/// Resolve a `resource://{id}` URI spilled by `cs_search` when a result set
/// was truncated to fit its token budget (§4.4).
fn read_spilled_resource(ctx: &ServerContext, uri: &str) -> Result<Value, String> {
    let text = match ctx.cache.get(uri) {
        Some(value) => serde_json::to_string_pretty(&value).unwrap_or_default(),
        None => return Err(format!("resource expired or not found: {uri}")),
    };
    Ok(json!({ "contents": [{ "uri": uri, "mimeType": "application/json", "text": text }] }))
}

fn read_conventions_resource(ctx: &ServerContext, uri: &str) -> Result<Value, String> {
    let files = codescope_core::scan::scan_files(&ctx.root, &codescope_core::config::WorkspaceConfig::load(&ctx.root));
    let report = codescope_core::conventions::mine_conventions(&files);

    let text = match uri {
        "conventions://summary" => codescope_core::conventions::format_conventions(&report),
        "conventions://errors" => serde_json::to_string_pretty(&report.error_handling).unwrap_or_default(),
        "conventions://naming" => serde_json::to_string_pretty(&report.naming).unwrap_or_default(),
        "conventions://testing" => serde_json::to_string_pretty(&report.testing).unwrap_or_default(),
        other => return Err(format!("unknown resource: {other}")),
    };

    Ok(json!({ "contents": [{ "uri": uri, "mimeType": "text/plain", "text": text }] }))
}

/// Start serving this workspace: stdio transport when `port` is `None`,
/// streamable HTTP otherwise.
pub fn serve(root: &Path, port: Option<u16>) -> CoreResult<()> {
    let ctx = ServerContext::open(root)?;
    match port {
        None => {
            stdio::run(ctx);
            Ok(())
        }
        Some(port) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| codescope_core::CoreError::Internal(e.to_string()))?;
            runtime.block_on(http::serve(ctx, port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_version_keeps_supported_client_version() {
        assert_eq!(negotiate_version("2025-06-18"), "2025-06-18");
    }

    #[test]
    fn negotiate_version_falls_back_to_latest_for_unknown_client() {
        assert_eq!(negotiate_version("1999-01-01"), LATEST_VERSION);
    }

    #[test]
    fn dispatch_jsonrpc_returns_none_for_notifications() {
        let msg = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ServerContext::open(tmp.path()).unwrap();
        let mut session = Session::default();
        assert!(dispatch_jsonrpc(&ctx, &msg, &mut session).is_none());
    }

    #[test]
    fn dispatch_jsonrpc_ping_returns_empty_result() {
        let msg = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ServerContext::open(tmp.path()).unwrap();
        let mut session = Session::default();
        let resp = dispatch_jsonrpc(&ctx, &msg, &mut session).unwrap();
        assert_eq!(resp["result"], json!({}));
    }
}

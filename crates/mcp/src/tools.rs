//! Tool registry and dispatch — each `cs_*` tool maps 1:1 onto one §6
//! contract. This is the single place a `CoreError` crosses into the
//! `{success, data?, error?, insights[], actions[]}` envelope; every handler
//! below returns `Envelope` directly instead of a bare `CoreResult`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codescope_core::cache::{Priority, ResultCache};
use codescope_core::shaper::{self, ResponseMode};
use codescope_core::tokenizer::BytesEstimateCounter;
use codescope_core::types::QueryMode;
use codescope_core::{cache, git, planner, refactor, resolver};
use codescope_core::{CoreError, WorkspaceHandle};
use serde_json::{json, Value};

use crate::envelope::Envelope;

/// Default token budget for `cs_search` when the caller doesn't pass `max_tokens`.
const DEFAULT_SEARCH_BUDGET: usize = 8_000;
/// How long a `cs_search` resource-URI spill stays fetchable.
const RESOURCE_SPILL_TTL: Duration = Duration::from_secs(30 * 60);

pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Tool names as exposed on the wire, per §6.1: short and memorable, one per
/// §6 contract. Aliases some clients still send are folded onto these in
/// `resolve_alias` rather than duplicated as separate handlers.
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "cs_search",
            description: "Search the workspace; auto-routes across exact/fuzzy/regex/symbol/semantic tiers",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "mode": {"type": "string", "enum": ["auto","exact","fuzzy","regex","symbol","semantic"]},
                    "limit": {"type": "integer"},
                    "max_tokens": {"type": "integer", "description": "response token budget; results are shaped to fit (§4.4)"},
                    "response_mode": {"type": "string", "enum": ["summary","adaptive","full"], "description": "requested detail level, clamped to max_tokens"},
                    "no_cache": {"type": "boolean", "description": "bypass the result cache for this call"}
                },
                "required": ["query"]
            }),
        },
        ToolDef {
            name: "cs_read",
            description: "Read a file's contents, optionally restricted to a line range",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "start_line": {"type": "integer"},
                    "end_line": {"type": "integer"}
                },
                "required": ["path"]
            }),
        },
        ToolDef {
            name: "cs_replace_lines",
            description: "Replace an inclusive 1-based line range in a file with new content",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "start_line": {"type": "integer"},
                    "end_line": {"type": "integer"},
                    "content": {"type": "string"},
                    "preserve_indentation": {"type": "boolean"}
                },
                "required": ["path", "start_line", "end_line", "content"]
            }),
        },
        ToolDef {
            name: "cs_delete_lines",
            description: "Delete an inclusive 1-based line range from a file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "start_line": {"type": "integer"},
                    "end_line": {"type": "integer"}
                },
                "required": ["path", "start_line", "end_line"]
            }),
        },
        ToolDef {
            name: "cs_goto_definition",
            description: "Resolve a symbol's definition site",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string"},
                    "case_sensitive": {"type": "boolean"}
                },
                "required": ["symbol"]
            }),
        },
        ToolDef {
            name: "cs_find_references",
            description: "Find every recorded occurrence of a symbol, classified by reference type",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string"},
                    "case_sensitive": {"type": "boolean"}
                },
                "required": ["symbol"]
            }),
        },
        ToolDef {
            name: "cs_search_and_replace",
            description: "Find-and-replace across the workspace with standard/literal/regex/code search modes",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "search": {"type": "string"},
                    "replace": {"type": "string"},
                    "mode": {"type": "string", "enum": ["standard","literal","regex","code"]},
                    "case_sensitive": {"type": "boolean"},
                    "max_matches": {"type": "integer"},
                    "preview": {"type": "boolean"}
                },
                "required": ["search", "replace"]
            }),
        },
        ToolDef {
            name: "cs_smart_refactor",
            description: "Structural refactor: rename_symbol, extract_to_file, move_symbol_to_file, extract_interface",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {"type": "string", "enum": ["rename_symbol","extract_to_file","move_symbol_to_file","extract_interface"]},
                    "symbol": {"type": "string"},
                    "new_name": {"type": "string"},
                    "target": {"type": "string"},
                    "interface_name": {"type": "string"},
                    "dry_run": {"type": "boolean"},
                    "max_files": {"type": "integer"}
                },
                "required": ["operation"]
            }),
        },
        ToolDef {
            name: "cs_directory_search",
            description: "Fuzzy search directory paths",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "include_hidden": {"type": "boolean"},
                    "limit": {"type": "integer"}
                },
                "required": ["pattern"]
            }),
        },
        ToolDef {
            name: "cs_recent_files",
            description: "Files modified after now minus a time frame, e.g. '7d', '2h'",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "time_frame": {"type": "string"},
                    "limit": {"type": "integer"},
                    "extension_filter": {"type": "string"}
                }
            }),
        },
        ToolDef {
            name: "cs_blame",
            description: "Git blame for a file, optionally restricted to a line range",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "start_line": {"type": "integer"},
                    "end_line": {"type": "integer"}
                },
                "required": ["path"]
            }),
        },
        ToolDef {
            name: "cs_file_history",
            description: "Commit history touching a file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["path"]
            }),
        },
        ToolDef {
            name: "cs_changed_since",
            description: "Files changed since a git revision (branch, tag, or commit)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "since": {"type": "string"}
                },
                "required": ["since"]
            }),
        },
        ToolDef {
            name: "cs_hot_files",
            description: "Most-frequently-committed files in a trailing window",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer"},
                    "days": {"type": "integer"}
                }
            }),
        },
        ToolDef {
            name: "cs_symbol_evolution",
            description: "Commits whose diff touched a symbol's line range",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "symbol": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["path", "symbol"]
            }),
        },
        ToolDef {
            name: "cs_co_change",
            description: "Files that co-occur with a given file in the same commits",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "limit": {"type": "integer"},
                    "days": {"type": "integer"}
                },
                "required": ["path"]
            }),
        },
        ToolDef {
            name: "cs_status",
            description: "Summarize the current workspace index: file/symbol counts, store location",
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}

/// Older client integrations may still send the teacher's longer names;
/// fold them onto the current short form here rather than registering a
/// second handler.
fn resolve_alias(name: &str) -> &str {
    match name {
        "text_search" | "file_search" | "cs_grep" => "cs_search",
        "goto_definition" => "cs_goto_definition",
        "find_references" => "cs_find_references",
        "search_and_replace" => "cs_search_and_replace",
        "smart_refactor" => "cs_smart_refactor",
        "replace_lines" => "cs_replace_lines",
        "delete_lines" => "cs_delete_lines",
        "directory_search" => "cs_directory_search",
        "recent_files" => "cs_recent_files",
        other => other,
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

fn arg_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn missing(field: &str) -> Envelope {
    Envelope::err_message(
        "VALIDATION_ERROR",
        format!("missing required field '{field}'"),
        vec![format!("provide '{field}' in the tool call arguments")],
    )
}

/// Parse a `<n>(min|h|d|w)` time-frame into a unix cutoff timestamp.
fn parse_time_frame(s: &str) -> Option<i64> {
    let s = s.trim();
    let split_at = s.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = s.split_at(split_at);
    let n: i64 = num.parse().ok()?;
    let seconds = match unit {
        "min" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        _ => return None,
    };
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).ok()?.as_secs() as i64;
    Some(now - n * seconds)
}

/// Tool families the Result Cache (C5) covers, paired with their §4.5 TTL.
/// Anything not listed here is dispatched straight through uncached.
fn cacheable(tool: &str) -> Option<Duration> {
    match tool {
        "cs_search" => Some(cache::default_ttl::TEXT_SEARCH),
        "cs_recent_files" => Some(cache::default_ttl::RECENT_FILES),
        "cs_goto_definition" => Some(cache::default_ttl::GOTO_DEFINITION),
        "cs_directory_search" => Some(cache::default_ttl::DIRECTORY_SEARCH),
        _ => None,
    }
}

/// Tools that mutate the workspace; a successful call invalidates every
/// cached tool family since any of them might now be stale.
fn is_mutating(tool: &str) -> bool {
    matches!(tool, "cs_replace_lines" | "cs_delete_lines" | "cs_search_and_replace" | "cs_smart_refactor")
}

fn invalidate_all_cached(cache: &ResultCache<Value>) {
    cache.invalidate_prefix("cs_search:");
    cache.invalidate_prefix("cs_recent_files:");
    cache.invalidate_prefix("cs_goto_definition:");
    cache.invalidate_prefix("cs_directory_search:");
}

/// Cache responses are stored as `{data, insights, actions}`; rebuild the
/// envelope from that shape.
fn envelope_from_cached(mut cached: Value) -> Envelope {
    let insights: Vec<String> =
        cached.get("insights").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
    let actions: Vec<String> =
        cached.get("actions").and_then(|v| serde_json::from_value(v.clone()).ok()).unwrap_or_default();
    let data = cached["data"].take();
    Envelope::ok_with(data, insights, actions)
}

fn cacheable_envelope(envelope: &Envelope) -> Option<Value> {
    let data = envelope.data.clone()?;
    Some(json!({ "data": data, "insights": envelope.insights, "actions": envelope.actions }))
}

/// Stamp whether this response came from the Result Cache, for cacheable
/// tool families only.
fn with_cache_hit(mut envelope: Envelope, hit: bool) -> Envelope {
    if let Some(obj) = envelope.data.as_mut().and_then(Value::as_object_mut) {
        obj.insert("cache_hit".into(), json!(hit));
    }
    envelope
}

pub fn call_tool(
    handle: &Arc<WorkspaceHandle>,
    workspace_root: &Path,
    cache: &ResultCache<Value>,
    name: &str,
    args: &Value,
) -> Envelope {
    let tool = resolve_alias(name);
    let no_cache = arg_bool(args, "no_cache", false);

    if let Some(ttl) = cacheable(tool) {
        // `no_cache` controls cache behavior, not the result itself, so it's
        // excluded from the key -- otherwise `no_cache=true` would silently
        // fragment the cache instead of bypassing it.
        let mut cache_args = args.clone();
        if let Some(obj) = cache_args.as_object_mut() {
            obj.remove("no_cache");
        }
        let canonical = serde_json::to_string(&cache_args).unwrap_or_default();
        let key = ResultCache::<Value>::key(tool, &canonical);
        if !no_cache {
            if let Some(cached) = cache.get(&key) {
                return with_cache_hit(envelope_from_cached(cached), true);
            }
        }
        let envelope = dispatch(handle, workspace_root, cache, tool, args);
        if envelope.success {
            if let Some(cached) = cacheable_envelope(&envelope) {
                cache.put(key, cached, ttl, Priority::Normal);
            }
        }
        return with_cache_hit(envelope, false);
    }

    let envelope = dispatch(handle, workspace_root, cache, tool, args);
    if is_mutating(tool) && envelope.success {
        invalidate_all_cached(cache);
    }
    envelope
}

fn dispatch(handle: &Arc<WorkspaceHandle>, workspace_root: &Path, cache: &ResultCache<Value>, tool: &str, args: &Value) -> Envelope {
    match tool {
        "cs_search" => tool_search(handle, cache, args),
        "cs_read" => tool_read(workspace_root, args),
        "cs_replace_lines" => tool_replace_lines(workspace_root, args),
        "cs_delete_lines" => tool_delete_lines(workspace_root, args),
        "cs_goto_definition" => tool_goto_definition(handle, args),
        "cs_find_references" => tool_find_references(handle, workspace_root, args),
        "cs_search_and_replace" => tool_search_and_replace(handle, workspace_root, args),
        "cs_smart_refactor" => tool_smart_refactor(handle, workspace_root, args),
        "cs_directory_search" => tool_directory_search(handle, args),
        "cs_recent_files" => tool_recent_files(handle, args),
        "cs_blame" => tool_blame(workspace_root, args),
        "cs_file_history" => tool_file_history(workspace_root, args),
        "cs_changed_since" => tool_changed_since(workspace_root, args),
        "cs_hot_files" => tool_hot_files(workspace_root, args),
        "cs_symbol_evolution" => tool_symbol_evolution(handle, workspace_root, args),
        "cs_co_change" => tool_co_change(workspace_root, args),
        "cs_status" => tool_status(handle, workspace_root),
        other => Envelope::err_message(
            "INVALID_QUERY",
            format!("unknown tool '{other}'"),
            vec!["call tools/list to see available tools".into()],
        ),
    }
}

fn tool_search(handle: &WorkspaceHandle, cache: &ResultCache<Value>, args: &Value) -> Envelope {
    let Some(query) = arg_str(args, "query") else { return missing("query") };
    let mode = match args.get("mode").and_then(Value::as_str) {
        Some("exact") => QueryMode::Exact,
        Some("fuzzy") => QueryMode::Fuzzy,
        Some("regex") => QueryMode::Regex,
        Some("symbol") => QueryMode::Symbol,
        Some("semantic") => QueryMode::Semantic,
        _ => QueryMode::Auto,
    };
    let limit = arg_usize(args, "limit", 20);
    let budget = arg_usize(args, "max_tokens", DEFAULT_SEARCH_BUDGET);
    let requested_mode = args.get("response_mode").and_then(Value::as_str).and_then(ResponseMode::parse);

    match planner::execute(handle, mode, query, limit, true) {
        Ok(result) => {
            let total = result.total;
            let truncated_at_limit = result.truncated;
            let counter = BytesEstimateCounter;
            let shaped = shaper::shape_hits(result.hits, query, budget, &counter, requested_mode, |hits| {
                let id = uuid::Uuid::new_v4();
                let uri = format!("resource://{id}");
                cache.put(uri.clone(), json!(hits), RESOURCE_SPILL_TTL, Priority::High);
                Some(uri)
            });

            let mut insights = shaped.insights.clone();
            if truncated_at_limit {
                insights.push(format!("results truncated at {limit}; narrow the query for full coverage"));
            }

            let data = json!({
                "hits": shaped.hits,
                "mode": shaped.mode,
                "total": total,
                "truncated": truncated_at_limit,
                "estimated_tokens": shaped.estimated_tokens,
                "budget": shaped.budget,
                "resource_uri": shaped.resource_uri,
            });
            Envelope::ok_with(data, insights, shaped.actions)
        }
        Err(e) => Envelope::err(&e),
    }
}

fn tool_read(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    match codescope_core::fileedit::read_with_encoding(workspace_root, path) {
        Ok(read) => {
            let start = args.get("start_line").and_then(Value::as_u64).map(|v| v as usize).unwrap_or(1).max(1) - 1;
            let end = args
                .get("end_line")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(read.lines.len())
                .min(read.lines.len());
            let content = read.lines.get(start..end).unwrap_or(&[]).join("\n");
            Envelope::ok(json!({
                "path": path,
                "start_line": start + 1,
                "end_line": end,
                "total_lines": read.lines.len(),
                "content": content,
            }))
        }
        Err(e) => Envelope::err(&e),
    }
}

fn tool_replace_lines(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    let Some(content) = arg_str(args, "content") else { return missing("content") };
    let start = arg_usize(args, "start_line", 0);
    let end = arg_usize(args, "end_line", 0);
    let preserve = arg_bool(args, "preserve_indentation", true);
    match codescope_core::fileedit::replace_lines(workspace_root, path, start, end, content, preserve) {
        Ok(result) => Envelope::ok(json!(result)),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_delete_lines(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    let start = arg_usize(args, "start_line", 0);
    let end = arg_usize(args, "end_line", 0);
    match codescope_core::fileedit::delete_lines(workspace_root, path, start, end) {
        Ok(result) => Envelope::ok(json!(result)),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_goto_definition(handle: &WorkspaceHandle, args: &Value) -> Envelope {
    let Some(symbol) = arg_str(args, "symbol") else { return missing("symbol") };
    match handle.get_symbol_definition(symbol) {
        Ok(Some(def)) => Envelope::ok(json!(def)),
        Ok(None) => Envelope::err(&CoreError::SymbolNotFound(symbol.to_string())),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_find_references(handle: &WorkspaceHandle, workspace_root: &Path, args: &Value) -> Envelope {
    let Some(symbol) = arg_str(args, "symbol") else { return missing("symbol") };
    let case_sensitive = arg_bool(args, "case_sensitive", true);
    match resolver::find_references(handle, workspace_root, symbol, case_sensitive) {
        Ok(refs) => Envelope::ok(json!({ "references": refs, "count": refs.len() })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_search_and_replace(handle: &WorkspaceHandle, workspace_root: &Path, args: &Value) -> Envelope {
    let Some(search) = arg_str(args, "search") else { return missing("search") };
    let Some(replace) = arg_str(args, "replace") else { return missing("replace") };
    let mode = match args.get("mode").and_then(Value::as_str) {
        Some("literal") => refactor::SearchMode::Literal,
        Some("regex") => refactor::SearchMode::Regex,
        Some("code") => refactor::SearchMode::Code,
        _ => refactor::SearchMode::Standard,
    };
    let options = refactor::SearchAndReplaceOptions {
        mode,
        case_sensitive: arg_bool(args, "case_sensitive", true),
        max_matches: arg_usize(args, "max_matches", 500),
    };
    let preview = arg_bool(args, "preview", true);
    match refactor::search_and_replace(handle, workspace_root, search, replace, &options, preview) {
        Ok(result) => result_to_envelope(result),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_smart_refactor(handle: &WorkspaceHandle, workspace_root: &Path, args: &Value) -> Envelope {
    let Some(operation) = arg_str(args, "operation") else { return missing("operation") };
    let dry_run = arg_bool(args, "dry_run", true);

    let outcome = match operation {
        "rename_symbol" => {
            let (Some(symbol), Some(new_name)) = (arg_str(args, "symbol"), arg_str(args, "new_name")) else {
                return missing("symbol/new_name");
            };
            let max_files = args.get("max_files").and_then(Value::as_u64).map(|v| v as usize);
            refactor::rename_symbol(handle, workspace_root, symbol, new_name, dry_run, max_files)
        }
        "extract_to_file" => {
            let (Some(symbol), Some(target)) = (arg_str(args, "symbol"), arg_str(args, "target")) else {
                return missing("symbol/target");
            };
            refactor::extract_to_file(handle, workspace_root, symbol, target, dry_run)
        }
        "move_symbol_to_file" => {
            let (Some(symbol), Some(target)) = (arg_str(args, "symbol"), arg_str(args, "target")) else {
                return missing("symbol/target");
            };
            refactor::move_symbol_to_file(handle, workspace_root, symbol, target, dry_run)
        }
        "extract_interface" => {
            let (Some(symbol), Some(interface_name)) = (arg_str(args, "symbol"), arg_str(args, "interface_name"))
            else {
                return missing("symbol/interface_name");
            };
            let target = arg_str(args, "target");
            refactor::extract_interface(handle, workspace_root, symbol, interface_name, target, dry_run)
        }
        other => {
            return Envelope::err_message(
                "INVALID_QUERY",
                format!("unknown smart_refactor operation '{other}'"),
                vec!["use one of rename_symbol, extract_to_file, move_symbol_to_file, extract_interface".into()],
            )
        }
    };

    match outcome {
        Ok(result) => result_to_envelope(result),
        Err(e) => Envelope::err(&e),
    }
}

fn result_to_envelope(result: codescope_core::types::RefactorResult) -> Envelope {
    let mut insights = Vec::new();
    if !result.plan.warnings.is_empty() {
        insights.extend(result.plan.warnings.clone());
    }
    if !result.dry_run {
        let failed = result.applied.iter().filter(|a| !a.applied).count();
        if failed > 0 {
            insights.push(format!("{failed} file(s) failed to apply; see per-file errors"));
        }
    }
    let actions = if result.dry_run {
        vec!["re-run with dry_run=false to apply this plan".to_string()]
    } else {
        Vec::new()
    };

    let total_replacements: usize = result.plan.files.iter().map(|f| f.edits.len()).sum();
    let total_files = result.plan.files.len();

    let mut data = json!(result);
    if let Some(obj) = data.as_object_mut() {
        obj.insert("total_replacements".into(), json!(total_replacements));
        obj.insert("total_files".into(), json!(total_files));
    }

    Envelope::ok_with(data, insights, actions)
}

fn tool_directory_search(handle: &WorkspaceHandle, args: &Value) -> Envelope {
    let Some(pattern) = arg_str(args, "pattern") else { return missing("pattern") };
    let include_hidden = arg_bool(args, "include_hidden", false);
    let limit = arg_usize(args, "limit", 50);
    match handle.search_directories(pattern, include_hidden, limit) {
        Ok(dirs) => Envelope::ok(json!({ "directories": dirs, "count": dirs.len() })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_recent_files(handle: &WorkspaceHandle, args: &Value) -> Envelope {
    let time_frame = arg_str(args, "time_frame").unwrap_or("7d");
    let Some(cutoff) = parse_time_frame(time_frame) else {
        return Envelope::err_message(
            "INVALID_QUERY",
            format!("invalid time frame '{time_frame}'"),
            vec!["use the form <n>(min|h|d|w), e.g. '30min', '2h', '7d', '1w'".into()],
        );
    };
    let limit = arg_usize(args, "limit", 50);
    let ext_filter = arg_str(args, "extension_filter");
    match handle.get_recent_files(cutoff, limit, ext_filter) {
        Ok(files) => Envelope::ok(json!({ "files": files, "count": files.len() })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_blame(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    let start = args.get("start_line").and_then(Value::as_u64).map(|v| v as usize);
    let end = args.get("end_line").and_then(Value::as_u64).map(|v| v as usize);
    match git::blame(workspace_root, path, start, end) {
        Ok(lines) => Envelope::ok(json!({ "lines": lines })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_file_history(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    let limit = arg_usize(args, "limit", 20);
    match git::file_history(workspace_root, path, limit) {
        Ok(commits) => Envelope::ok(json!({ "commits": commits, "count": commits.len() })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_changed_since(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(since) = arg_str(args, "since") else { return missing("since") };
    match git::changed_since(workspace_root, since) {
        Ok(files) => Envelope::ok(json!({ "files": files, "count": files.len() })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_hot_files(workspace_root: &Path, args: &Value) -> Envelope {
    let limit = arg_usize(args, "limit", 20);
    let days = arg_usize(args, "days", 30);
    match git::hot_files(workspace_root, limit, days) {
        Ok(files) => Envelope::ok(json!({ "files": files })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_symbol_evolution(handle: &WorkspaceHandle, workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    let Some(symbol_name) = arg_str(args, "symbol") else { return missing("symbol") };
    let limit = arg_usize(args, "limit", 20);

    let symbol = match handle.get_symbols_by_name(symbol_name, true) {
        Ok(mut syms) => match syms.pop() {
            Some(s) => s,
            None => return Envelope::err(&CoreError::SymbolNotFound(symbol_name.to_string())),
        },
        Err(e) => return Envelope::err(&e),
    };

    match git::symbol_evolution(workspace_root, path, &symbol, limit) {
        Ok(commits) => Envelope::ok(json!({ "commits": commits, "count": commits.len() })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_co_change(workspace_root: &Path, args: &Value) -> Envelope {
    let Some(path) = arg_str(args, "path") else { return missing("path") };
    let limit = arg_usize(args, "limit", 20);
    let days = arg_usize(args, "days", 90);
    match git::co_change(workspace_root, path, limit, days) {
        Ok(files) => Envelope::ok(json!({ "files": files })),
        Err(e) => Envelope::err(&e),
    }
}

fn tool_status(handle: &WorkspaceHandle, workspace_root: &Path) -> Envelope {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;
    match handle.get_recent_files(0, 1, None) {
        Ok(_) => Envelope::ok(json!({
            "workspace": workspace_root.display().to_string(),
            "indexed": true,
            "checked_at": now,
        })),
        Err(e) => Envelope::err(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_alias_folds_legacy_names_onto_cs_prefixed_tools() {
        assert_eq!(resolve_alias("goto_definition"), "cs_goto_definition");
        assert_eq!(resolve_alias("text_search"), "cs_search");
        assert_eq!(resolve_alias("cs_search"), "cs_search");
        assert_eq!(resolve_alias("cs_blame"), "cs_blame");
    }

    #[test]
    fn parse_time_frame_accepts_all_units() {
        assert!(parse_time_frame("30min").is_some());
        assert!(parse_time_frame("2h").is_some());
        assert!(parse_time_frame("7d").is_some());
        assert!(parse_time_frame("1w").is_some());
        assert!(parse_time_frame("garbage").is_none());
        assert!(parse_time_frame("10x").is_none());
    }

    #[test]
    fn parse_time_frame_cutoff_is_before_now() {
        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;
        let cutoff = parse_time_frame("7d").unwrap();
        assert!(cutoff < now);
        assert_eq!(now - cutoff, 7 * 86400);
    }

    #[test]
    fn missing_reports_validation_error_with_field_name() {
        let env = missing("query");
        assert!(!env.success);
        let err = env.error.unwrap();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert!(err.message.contains("query"));
    }

    fn handle_over(dir: &std::path::Path) -> Arc<WorkspaceHandle> {
        Arc::new(codescope_core::index_workspace(dir).unwrap())
    }

    #[test]
    fn search_is_cached_on_second_call_and_reports_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn login_handler() {}\n").unwrap();
        let handle = handle_over(dir.path());
        let cache: ResultCache<Value> = ResultCache::new(128);

        let first = call_tool(&handle, dir.path(), &cache, "cs_search", &json!({"query": "login_handler"}));
        assert!(first.success);
        assert_eq!(first.data.as_ref().unwrap()["cache_hit"], json!(false));

        let second = call_tool(&handle, dir.path(), &cache, "cs_search", &json!({"query": "login_handler"}));
        assert_eq!(second.data.as_ref().unwrap()["cache_hit"], json!(true));
    }

    #[test]
    fn no_cache_flag_bypasses_the_cache_without_fragmenting_the_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn login_handler() {}\n").unwrap();
        let handle = handle_over(dir.path());
        let cache: ResultCache<Value> = ResultCache::new(128);

        call_tool(&handle, dir.path(), &cache, "cs_search", &json!({"query": "login_handler"}));
        // no_cache=true still writes through, reusing the same key the
        // non-no_cache call used (no_cache is excluded from the cache key).
        let second =
            call_tool(&handle, dir.path(), &cache, "cs_search", &json!({"query": "login_handler", "no_cache": true}));
        assert_eq!(second.data.as_ref().unwrap()["cache_hit"], json!(false));

        let third = call_tool(&handle, dir.path(), &cache, "cs_search", &json!({"query": "login_handler"}));
        assert_eq!(third.data.as_ref().unwrap()["cache_hit"], json!(true));
    }

    #[test]
    fn mutating_tool_invalidates_cached_search_results() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn login_handler() {}\nline two\n").unwrap();
        let handle = handle_over(dir.path());
        let cache: ResultCache<Value> = ResultCache::new(128);

        call_tool(&handle, dir.path(), &cache, "cs_search", &json!({"query": "login_handler"}));
        let key = ResultCache::<Value>::key("cs_search", &serde_json::to_string(&json!({"query": "login_handler"})).unwrap());
        assert!(cache.get(&key).is_some());

        call_tool(
            &handle,
            dir.path(),
            &cache,
            "cs_replace_lines",
            &json!({"path": "a.rs", "start_line": 2, "end_line": 2, "content": "replaced"}),
        );
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn search_response_mode_is_honored_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.rs")), "fn login_handler() {}\n").unwrap();
        }
        let handle = handle_over(dir.path());
        let cache: ResultCache<Value> = ResultCache::new(128);

        let env = call_tool(
            &handle,
            dir.path(),
            &cache,
            "cs_search",
            &json!({"query": "login_handler", "response_mode": "summary"}),
        );
        assert_eq!(env.data.as_ref().unwrap()["mode"], json!("summary"));
    }
}

//! Stdio JSON-RPC transport: line-delimited JSON-RPC 2.0 over stdin/stdout.
//! The primary transport for editor/agent integrations — no network
//! exposure, one session for the process lifetime.

use std::io::{self, BufRead, Write};

use serde_json::json;

use crate::{dispatch_jsonrpc, Session, ServerContext};

pub fn run(ctx: ServerContext) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let reader = stdin.lock();
    let mut session = Session::default();

    tracing::info!(workspace = %ctx.root.display(), "MCP stdio server ready");

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                write_response(&stdout, &json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                }));
                continue;
            }
        };

        let method = msg["method"].as_str().unwrap_or("");
        if method == "notifications/initialized" || method == "notifications/cancelled" {
            continue;
        }

        if !session.initialized && method != "initialize" && method != "ping" {
            if let Some(id) = msg.get("id").cloned() {
                write_response(&stdout, &json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32002, "message": "Server not initialized. Send 'initialize' first." }
                }));
            }
            continue;
        }

        if let Some(response) = dispatch_jsonrpc(&ctx, &msg, &mut session) {
            write_response(&stdout, &response);
        }
    }
}

fn write_response(stdout: &io::Stdout, value: &serde_json::Value) {
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}", value);
    let _ = out.flush();
}

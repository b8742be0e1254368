//! Streamable HTTP transport (MCP 2025-11-25): `POST /mcp` for JSON-RPC
//! request/response (single or batched), `DELETE /mcp` for session
//! termination, `GET /mcp` returns 405 (no server push). Session state is
//! keyed by the `Mcp-Session-Id` header, created on `initialize`.
//!
//! Bearer-token *validation* against an OAuth issuer's JWKS is out of scope
//! (authentication is an assumed external collaborator) — this transport
//! accepts any well-formed bearer token, matching the teacher's `auth.rs`
//! stub. `Origin` header validation guards against DNS-rebinding from a
//! browser tab instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{dispatch_jsonrpc, Session, ServerContext};

const SESSION_HEADER: &str = "mcp-session-id";

struct HttpSession {
    inner: Session,
    last_activity: Instant,
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<ServerContext>,
    sessions: Arc<Mutex<HashMap<String, HttpSession>>>,
}

pub async fn serve(ctx: ServerContext, port: u16) -> codescope_core::CoreResult<()> {
    let state = AppState { ctx: Arc::new(ctx), sessions: Arc::new(Mutex::new(HashMap::new())) };

    let app = Router::new()
        .route("/mcp", post(handle_post).delete(handle_delete).get(handle_get))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| codescope_core::CoreError::Internal(format!("bind {addr}: {e}")))?;

    tracing::info!(%addr, "MCP streamable HTTP server ready");
    axum::serve(listener, app).await.map_err(|e| codescope_core::CoreError::Internal(e.to_string()))
}

/// Browser-originated requests carry an `Origin` header; reject anything
/// that isn't loopback to block DNS-rebinding attacks against the local
/// server. Non-browser clients (editors, CLIs) send no `Origin` at all and
/// pass through.
fn origin_is_safe(headers: &HeaderMap) -> bool {
    match headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(origin) => origin.contains("localhost") || origin.contains("127.0.0.1"),
    }
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Response, Response> {
    if !origin_is_safe(&headers) {
        return Err(error_response(StatusCode::FORBIDDEN, "Origin not permitted"));
    }

    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "jsonrpc": "2.0", "id": null, "error": { "code": -32700, "message": "Parse error" } }),
            ))
        }
    };

    let is_batch = parsed.is_array();
    let requests: Vec<serde_json::Value> = if is_batch { parsed.as_array().unwrap().clone() } else { vec![parsed] };
    let has_initialize = requests.iter().any(|r| r["method"].as_str() == Some("initialize"));

    let session_id = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);

    if !has_initialize {
        let sessions = state.sessions.lock().unwrap();
        match session_id.as_ref() {
            Some(s) if sessions.contains_key(s) => {}
            Some(_) => return Err(error_response(StatusCode::BAD_REQUEST, "Invalid or expired session ID")),
            None => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "Missing Mcp-Session-Id header. Send 'initialize' first.",
                ))
            }
        }
    }

    let mut responses = Vec::new();
    let mut new_session_id: Option<String> = None;

    for req in &requests {
        let method = req["method"].as_str().unwrap_or("");

        if method == "initialize" {
            let sid = Uuid::new_v4().to_string();
            let mut session = Session::default();
            if let Some(resp) = dispatch_jsonrpc(&state.ctx, req, &mut session) {
                responses.push(resp);
            }
            state.sessions.lock().unwrap().insert(sid.clone(), HttpSession { inner: session, last_activity: Instant::now() });
            new_session_id = Some(sid);
        } else if method.starts_with("notifications/") {
            if let Some(sid) = session_id.as_ref() {
                if let Some(s) = state.sessions.lock().unwrap().get_mut(sid) {
                    s.last_activity = Instant::now();
                }
            }
        } else {
            let sid = session_id.clone().or_else(|| new_session_id.clone()).unwrap();
            let mut inner = {
                let mut sessions = state.sessions.lock().unwrap();
                let entry = sessions.get_mut(&sid);
                match entry {
                    Some(s) => {
                        s.last_activity = Instant::now();
                        std::mem::take(&mut s.inner)
                    }
                    None => Session::default(),
                }
            };
            if let Some(resp) = dispatch_jsonrpc(&state.ctx, req, &mut inner) {
                responses.push(resp);
            }
            if let Some(s) = state.sessions.lock().unwrap().get_mut(&sid) {
                s.inner = inner;
            }
        }
    }

    if responses.is_empty() {
        return Ok(Response::builder().status(StatusCode::ACCEPTED).body(Body::empty()).unwrap());
    }

    let body_json =
        if is_batch { serde_json::to_string(&responses).unwrap() } else { serde_json::to_string(&responses[0]).unwrap() };

    let mut builder = Response::builder().status(StatusCode::OK).header("content-type", "application/json");
    if let Some(sid) = &new_session_id {
        builder = builder.header(SESSION_HEADER, sid);
    }
    Ok(builder.body(Body::from(body_json)).unwrap())
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(sid) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        state.sessions.lock().unwrap().remove(sid);
    }
    StatusCode::OK
}

async fn handle_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, &json!({ "jsonrpc": "2.0", "id": null, "error": { "code": -32600, "message": message } }))
}

//! The `{success, data?, error?{code, message, recovery{steps[]}}, insights[],
//! actions[]}` tool envelope every MCP tool call returns, per §6.1. Library
//! code never constructs this directly — `dispatch_tool_call` is the single
//! place a `CoreError` crosses into it.

use codescope_core::CoreError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct Recovery {
    pub steps: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ToolError {
    pub code: &'static str,
    pub message: String,
    pub recovery: Recovery,
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub insights: Vec<String>,
    pub actions: Vec<String>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None, insights: Vec::new(), actions: Vec::new() }
    }

    pub fn ok_with(data: Value, insights: Vec<String>, actions: Vec<String>) -> Self {
        Self { success: true, data: Some(data), error: None, insights, actions }
    }

    pub fn err(e: &CoreError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolError {
                code: e.code(),
                message: e.to_string(),
                recovery: Recovery { steps: e.recovery_steps() },
            }),
            insights: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn err_message(code: &'static str, message: String, steps: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolError { code, message, recovery: Recovery { steps } }),
            insights: Vec::new(),
            actions: Vec::new(),
        }
    }
}

//! JSON-RPC 2.0 tool endpoint (`POST /mcp`).
//!
//! Methods: `initialize`, `ping`, `tools/list`, `tools/call`. Every reply is
//! HTTP 200; failures travel in the JSON-RPC `error` member.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crmpilot_core::error::ProtocolError;
use crmpilot_core::provider::ToolDefinition;
use crmpilot_core::tool::ToolResult;

use crate::auth::credential_from_headers;
use crate::SharedState;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ProtocolError>,
    id: Value,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: Value, error: ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct ToolList {
    tools: Vec<ToolDefinition>,
}

pub async fn mcp_handler(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Json<RpcResponse> {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Unparseable JSON-RPC body");
            return Json(RpcResponse::err(Value::Null, ProtocolError::parse_error()));
        }
    };
    let id = raw.get("id").cloned().unwrap_or(Value::Null);
    let Ok(request) = serde_json::from_value::<RpcRequest>(raw) else {
        return Json(RpcResponse::err(id, ProtocolError::invalid_request("Invalid Request")));
    };

    if request.jsonrpc != JSONRPC_VERSION || request.method.is_empty() {
        return Json(RpcResponse::err(id, ProtocolError::invalid_request("Invalid Request")));
    }

    let reply = match dispatch(&state, &headers, &request.method, request.params).await {
        Ok(result) => RpcResponse::ok(id, result),
        Err(error) => {
            debug!(method = %request.method, code = error.code, "JSON-RPC error");
            RpcResponse::err(id, error)
        }
    };
    Json(reply)
}

async fn dispatch(
    state: &SharedState,
    headers: &HeaderMap,
    method: &str,
    params: Option<Value>,
) -> Result<Value, ProtocolError> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "crmpilot", "version": env!("CARGO_PKG_VERSION") },
        })),
        "ping" => Ok(json!("pong")),
        "tools/list" => to_value(ToolList {
            tools: state.tools.list_tools(),
        }),
        "tools/call" => {
            let params: CallParams = params
                .and_then(|p| serde_json::from_value(p).ok())
                .ok_or_else(ProtocolError::invalid_params)?;
            let Some(credential) = credential_from_headers(headers) else {
                warn!(tool = %params.name, "tools/call without a credential");
                return Err(ProtocolError::unauthorized());
            };
            let result: ToolResult = state
                .tools
                .call_tool(&credential, &params.name, params.arguments)
                .await?;
            to_value(result)
        }
        other => Err(ProtocolError::method_not_found(other)),
    }
}

fn to_value(value: impl Serialize) -> Result<Value, ProtocolError> {
    serde_json::to_value(value)
        .map_err(|e| ProtocolError::new(ProtocolError::INTERNAL_ERROR, format!("Internal error: {e}")))
}

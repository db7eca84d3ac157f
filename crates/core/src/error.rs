//! Error types for the crmpilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] aggregates them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for crmpilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model client errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Record backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Context store errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Tool protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures reported by the record backend client.
///
/// The display form of [`BackendError::Api`] is what the model reads inside
/// a failed tool result, so it stays short: `api error (404): not found`.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// A protocol-level failure of the tool surface.
///
/// Distinct from a tool result with `isError = true`: protocol errors mean
/// the call never reached a handler (unknown tool, malformed envelope,
/// missing credential). Codes follow JSON-RPC 2.0.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
}

impl ProtocolError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method '{method}' not found"))
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Tool '{name}' not found"))
    }

    pub fn invalid_params() -> Self {
        Self::new(Self::INVALID_PARAMS, "Invalid params")
    }

    pub fn unauthorized() -> Self {
        Self::new(Self::INTERNAL_ERROR, "Unauthorized: no auth token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn backend_error_reads_like_api_message() {
        let err = BackendError::Api {
            status: 400,
            message: "field 'name' is required".into(),
        };
        assert_eq!(err.to_string(), "api error (400): field 'name' is required");
    }

    #[test]
    fn tool_not_found_uses_method_not_found_code() {
        let err = ProtocolError::tool_not_found("teleport");
        assert_eq!(err.code, ProtocolError::METHOD_NOT_FOUND);
        assert_eq!(err.message, "Tool 'teleport' not found");
    }

    #[test]
    fn protocol_error_serializes_as_jsonrpc_error_object() {
        let json = serde_json::to_value(ProtocolError::invalid_params()).unwrap();
        assert_eq!(json["code"], -32602);
        assert_eq!(json["message"], "Invalid params");
    }
}

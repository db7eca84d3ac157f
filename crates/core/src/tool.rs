//! Tool result envelope and the dispatcher seam.
//!
//! Every tool answers with the same envelope: a list of text parts plus an
//! `isError` flag. The consumer is a model reading a transcript, so results
//! are always text (JSON payloads are pretty-printed into the text).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProtocolError;
use crate::provider::ToolDefinition;

/// One part of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: text.into(),
        }
    }
}

/// The uniform result envelope of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,

    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result carrying one text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// A tool-level failure the model can read and adapt to.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
        }
    }

    /// All text parts joined, each followed by a newline.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == "text")
            .fold(String::new(), |mut acc, c| {
                acc.push_str(&c.text);
                acc.push('\n');
                acc
            })
    }
}

/// Lists tools and dispatches calls on behalf of one credential.
///
/// The orchestrator depends on this seam rather than on the concrete tool
/// bus so it can be driven by scripted dispatchers in tests.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// The full, static tool catalog.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Dispatch one call. `arguments` is the raw JSON text the model produced.
    async fn dispatch(
        &self,
        credential: &str,
        name: &str,
        arguments: &str,
    ) -> std::result::Result<ToolResult, ProtocolError>;
}

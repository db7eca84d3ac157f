//! Tool-level failures.
//!
//! A `ToolFailure` never escapes the bus as an error: it is rendered into
//! the text of a `ToolResult` with `isError = true` so the model can read
//! it and adapt.

use crmpilot_core::error::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error("{0} is required")]
    MissingArgument(&'static str),

    #[error("{field} must be {expected}")]
    InvalidArgument { field: &'static str, expected: String },

    #[error("nothing to update: provide at least one of {0}")]
    NothingToUpdate(&'static str),

    /// `context` is the action prefix the model sees, e.g. `Create failed`.
    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ToolFailure {
    pub fn invalid(field: &'static str, expected: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            expected: expected.into(),
        }
    }

    /// Adapter for `map_err` on backend calls.
    pub fn backend(context: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::Backend { context, source }
    }
}

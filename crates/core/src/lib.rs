//! # crmpilot Core
//!
//! Domain types, client contracts, and error definitions for the crmpilot
//! tool orchestrator. This crate has **no framework dependencies**: it
//! defines the model that the context store, tool bus, agent, and gateway
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Both external collaborators are traits defined here:
//! - [`Provider`] is the model-completion client
//! - [`RecordBackend`] is the record/schema backend client
//!
//! Implementations live in `crmpilot-providers`; tests substitute scripted
//! doubles. All crates depend inward on core.

pub mod backend;
pub mod error;
pub mod message;
pub mod provider;
pub mod records;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use backend::RecordBackend;
pub use error::{BackendError, ContextError, Error, ProtocolError, ProviderError, Result};
pub use message::{ChatMessage, FunctionCall, Role, ToolCall};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Content, ToolDispatcher, ToolResult};

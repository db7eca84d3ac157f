//! The crmpilot tool bus.
//!
//! A fixed catalog of CRM tools (schema, records, analytics, dashboards,
//! apps, themes, recycle bin, and active context) dispatched by name. Every
//! call carries the caller's credential, which is forwarded to the record
//! backend and selects the caller's context session.
//!
//! Handler failures never escape as protocol errors: they come back as a
//! [`ToolResult`] with `is_error` set, so the model can read and react to
//! them. Only an unknown tool name or malformed arguments are protocol
//! errors.

pub mod args;
pub mod error;
pub mod handlers;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use args::Args;
pub use error::ToolFailure;
pub use registry::{Handler, HandlerResult, ToolInvocation, ToolRegistry};

use async_trait::async_trait;
use crmpilot_context::{session_fingerprint, ContextStore};
use crmpilot_core::backend::RecordBackend;
use crmpilot_core::error::ProtocolError;
use crmpilot_core::provider::ToolDefinition;
use crmpilot_core::tool::{ToolDispatcher, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Build the registry holding every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    handlers::schema::register(&mut registry);
    handlers::records::register(&mut registry);
    handlers::analytics::register(&mut registry);
    handlers::dashboards::register(&mut registry);
    handlers::apps::register(&mut registry);
    handlers::themes::register(&mut registry);
    handlers::recycle_bin::register(&mut registry);
    handlers::context::register(&mut registry);
    registry
}

/// Routes tool calls to their handlers. Cheap to clone.
#[derive(Clone)]
pub struct ToolBus {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn RecordBackend>,
    contexts: Arc<ContextStore>,
}

impl ToolBus {
    pub fn new(backend: Arc<dyn RecordBackend>, contexts: Arc<ContextStore>) -> Self {
        Self::with_registry(builtin_registry(), backend, contexts)
    }

    pub fn with_registry(
        registry: ToolRegistry,
        backend: Arc<dyn RecordBackend>,
        contexts: Arc<ContextStore>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            backend,
            contexts,
        }
    }

    /// The tool catalog, in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// Invoke a tool with already-parsed arguments. `Null` means no
    /// arguments; any other non-object value is rejected.
    pub async fn call_tool(
        &self,
        credential: &str,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult, ProtocolError> {
        let handler = self
            .registry
            .handler(name)
            .ok_or_else(|| ProtocolError::tool_not_found(name))?;
        let args = Args::from_value(arguments).ok_or_else(ProtocolError::invalid_params)?;

        let started = Instant::now();
        let outcome = handler(ToolInvocation {
            backend: Arc::clone(&self.backend),
            contexts: Arc::clone(&self.contexts),
            credential: credential.to_string(),
            args,
        })
        .await;

        let result = match outcome {
            Ok(text) => ToolResult::text(text),
            Err(failure) => {
                debug!(tool = name, error = %failure, "Tool reported failure");
                ToolResult::error(failure.to_string())
            }
        };

        info!(
            tool = name,
            session = %session_fingerprint(credential),
            is_error = result.is_error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for ToolBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBus")
            .field("tools", &self.registry.len())
            .field("sessions", &self.contexts.len())
            .finish()
    }
}

#[async_trait]
impl ToolDispatcher for ToolBus {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.list_tools()
    }

    async fn dispatch(
        &self,
        credential: &str,
        name: &str,
        arguments: &str,
    ) -> Result<ToolResult, ProtocolError> {
        let value = if arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                ProtocolError::new(ProtocolError::INVALID_PARAMS, format!("Invalid arguments JSON: {e}"))
            })?
        };
        self.call_tool(credential, name, value).await
    }
}

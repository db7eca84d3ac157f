//! Static dispatch table from tool name to handler.

use crate::args::Args;
use crate::error::ToolFailure;
use crmpilot_context::ContextStore;
use crmpilot_core::backend::RecordBackend;
use crmpilot_core::provider::ToolDefinition;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a handler needs for one call. Owned, so handler futures are
/// `'static` and can be stored as plain `fn` pointers.
pub struct ToolInvocation {
    pub backend: Arc<dyn RecordBackend>,
    pub contexts: Arc<ContextStore>,
    pub credential: String,
    pub args: Args,
}

/// On success, the text payload of the result.
pub type HandlerResult = Result<String, ToolFailure>;

pub type Handler = fn(ToolInvocation) -> BoxFuture<'static, HandlerResult>;

struct ToolEntry {
    definition: ToolDefinition,
    handler: Handler,
}

/// Immutable once built; shared behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Catalog order is registration order. A second
    /// registration under the same name is ignored.
    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        input_schema: Value,
        handler: Handler,
    ) {
        if self.index.contains_key(name) {
            tracing::warn!(tool = name, "Ignoring duplicate tool registration");
            return;
        }
        self.index.insert(name, self.entries.len());
        self.entries.push(ToolEntry {
            definition: ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                input_schema,
            },
            handler,
        });
    }

    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.index.get(name).map(|&i| self.entries[i].handler)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.definition.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

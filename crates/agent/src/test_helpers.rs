//! Shared test doubles for the compactor and orchestrator tests.

use async_trait::async_trait;
use crmpilot_core::error::{ProtocolError, ProviderError};
use crmpilot_core::message::{ChatMessage, ToolCall};
use crmpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
use crmpilot_core::tool::{ToolDispatcher, ToolResult};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// A provider that replays scripted outcomes in order and records every
/// request it receives.
///
/// Panics if called more times than it has outcomes.
pub struct ScriptedProvider {
    outcomes: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        let outcomes = self.outcomes.lock().unwrap();
        match outcomes.get(call) {
            Some(outcome) => outcome.clone(),
            None => panic!("ScriptedProvider: no outcome for call #{call} (have {})", outcomes.len()),
        }
    }
}

/// A provider that never answers within a test's patience. `started` fires
/// once the call is in flight.
pub struct SlowProvider {
    delay: Duration,
    pub started: Notify,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Notify::new(),
        }
    }
}

#[async_trait]
impl Provider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(make_text_response("too late"))
    }
}

fn response(message: ChatMessage) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A plain text answer.
pub fn make_text_response(text: &str) -> ProviderResponse {
    response(ChatMessage::assistant(text))
}

/// An answer that calls tools, with `thought` as its partial content.
pub fn make_tool_call_response(tool_calls: Vec<ToolCall>, thought: &str) -> ProviderResponse {
    response(ChatMessage::assistant_with_tools(thought, tool_calls))
}

pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

/// A dispatcher that echoes every call and records what it saw.
///
/// Calls to `fail_tool` come back as error results; unknown names (any name
/// starting with `unknown`) are protocol errors. `slow_tool` takes a minute.
#[derive(Default)]
pub struct EchoDispatcher {
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl EchoDispatcher {
    pub fn recorded(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolDispatcher for EchoDispatcher {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "query_object".into(),
            description: "Query records".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }]
    }

    async fn dispatch(
        &self,
        credential: &str,
        name: &str,
        arguments: &str,
    ) -> Result<ToolResult, ProtocolError> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.to_string(), name.to_string(), arguments.to_string()));
        if name.starts_with("unknown") {
            return Err(ProtocolError::tool_not_found(name));
        }
        if name == "slow_tool" {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if name == "fail_tool" {
            return Ok(ToolResult::error("Query failed: api error (500): boom"));
        }
        Ok(ToolResult::text(format!("{name} ok")))
    }
}

//! The agent turn loop.
//!
//! One turn runs as a spawned task that feeds [`StreamEvent`]s into a
//! bounded channel:
//!
//! 1. **Prepare** the history: system prompt plus the session's active context
//! 2. **Compact** when the history is over the auto-compaction trigger
//! 3. **Call the model** with the tool catalog attached
//! 4. **If tool calls**: dispatch each one, append the results, loop to 2
//! 5. **Otherwise**: emit the answer and the final history
//!
//! Cancellation is checked before every model call and every tool dispatch,
//! and races each in-flight model call, dispatch and summarization. A
//! cancelled turn simply stops; its channel closes without a terminal event.

use crate::compactor::Compactor;
use crate::prompt::{base_system_prompt, context_block, prepare_history};
use crate::stream_event::StreamEvent;
use chrono::Local;
use crmpilot_config::AgentConfig;
use crmpilot_context::{session_fingerprint, ContextStore};
use crmpilot_core::message::ChatMessage;
use crmpilot_core::provider::{Provider, ProviderRequest};
use crmpilot_core::token::estimate_messages_tokens;
use crmpilot_core::tool::ToolDispatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const STEP_LIMIT_NOTICE: &str = "I apologize, but I was unable to complete the request within the step limit. Please try a simpler request.";

const CHAT_TEMPERATURE: f32 = 0.7;

/// One turn's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,

    /// Overrides the configured default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// The turn ended with an `error` event.
    #[error("{0}")]
    Turn(String),

    #[error("turn ended before completing")]
    Interrupted,
}

/// The receiver is gone or the turn was cancelled.
#[derive(Debug)]
struct Stopped;

struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    fn check(&self) -> Result<(), Stopped> {
        if self.cancel.is_cancelled() || self.tx.is_closed() {
            return Err(Stopped);
        }
        Ok(())
    }

    async fn emit(&self, event: StreamEvent) -> Result<(), Stopped> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stopped),
            sent = self.tx.send(event) => sent.map_err(|_| Stopped),
        }
    }

    /// Await `fut` unless the turn is cancelled first; a cancelled future is
    /// dropped mid-flight.
    async fn guard<F: std::future::Future>(&self, fut: F) -> Result<F::Output, Stopped> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stopped),
            out = fut => Ok(out),
        }
    }
}

/// Drives agent turns. Cheap to clone; every turn task holds its own clone.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolDispatcher>,
    contexts: Arc<ContextStore>,
    compactor: Arc<Compactor>,
    config: AgentConfig,
    default_model: String,
    temperature: f32,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolDispatcher>,
        contexts: Arc<ContextStore>,
        compactor: Arc<Compactor>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            contexts,
            compactor,
            config: AgentConfig::default(),
            default_model: default_model.into(),
            temperature: CHAT_TEMPERATURE,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn compactor(&self) -> &Arc<Compactor> {
        &self.compactor
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    pub fn tools(&self) -> &Arc<dyn ToolDispatcher> {
        &self.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The system prompt a fresh conversation would start with for this
    /// credential, active context included.
    pub fn system_prompt(&self, credential: &str) -> String {
        format!(
            "{}{}",
            base_system_prompt(&Local::now()),
            self.context_for(credential)
        )
    }

    fn context_for(&self, credential: &str) -> String {
        if credential.is_empty() {
            return String::new();
        }
        self.contexts
            .get(credential)
            .map(|session| context_block(&session.list_items()))
            .unwrap_or_default()
    }

    /// Start a turn. Events arrive on the returned receiver; the channel
    /// closes after `done`, after `error`, or when `cancel` fires.
    pub fn run_stream(
        &self,
        credential: impl Into<String>,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let credential = credential.into();
        let span = info_span!(
            "turn",
            turn_id = %Uuid::new_v4(),
            session = %session_fingerprint(&credential)
        );
        let this = self.clone();

        tokio::spawn(
            async move {
                let sink = EventSink { tx, cancel };
                if this.drive(&credential, request, &sink).await.is_err() {
                    debug!("Turn stopped early: cancelled or receiver dropped");
                }
            }
            .instrument(span),
        );
        rx
    }

    /// Run a turn to completion and return the final answer and history.
    pub async fn chat(
        &self,
        credential: impl Into<String>,
        request: ChatRequest,
    ) -> Result<ChatResponse, AgentError> {
        let cancel = CancellationToken::new();
        // Dropping this future abandons the turn.
        let _guard = cancel.clone().drop_guard();
        let mut events = self.run_stream(credential, request, cancel);

        let mut content = String::new();
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Content { content: text } => content = text,
                StreamEvent::Done { history } => return Ok(ChatResponse { content, history }),
                StreamEvent::Error { content } => return Err(AgentError::Turn(content)),
                _ => {}
            }
        }
        Err(AgentError::Interrupted)
    }

    async fn drive(&self, credential: &str, request: ChatRequest, sink: &EventSink) -> Result<(), Stopped> {
        let model = request
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        let mut history = request.messages;
        prepare_history(
            &mut history,
            &base_system_prompt(&Local::now()),
            &self.context_for(credential),
        );

        let tools = self.tools.definitions();
        let trigger = self.config.compact_trigger_tokens();
        info!(model = %model, messages = history.len(), tools = tools.len(), "Starting agent turn");

        let mut last_text: Option<String> = None;
        for round in 1..=self.config.max_tool_rounds {
            sink.check()?;
            history = self.auto_compact(history, trigger, sink).await?;

            debug!(round, messages = history.len(), "Calling model");
            let request = ProviderRequest::new(model.clone(), history.clone())
                .with_temperature(self.temperature)
                .with_tools(tools.clone());
            let message = match sink.guard(self.provider.complete(request)).await? {
                Ok(response) => response.message,
                Err(e) => {
                    error!(round, error = %e, "Model call failed");
                    return sink
                        .emit(StreamEvent::Error {
                            content: format!("LLM Error: {e}"),
                        })
                        .await;
                }
            };
            if !message.content.trim().is_empty() {
                last_text = Some(message.content.clone());
            }

            if !message.has_tool_calls() {
                let content = message.content.clone();
                history.push(message);
                sink.emit(StreamEvent::Content { content }).await?;
                info!(rounds = round, messages = history.len(), "Agent turn complete");
                return sink.emit(StreamEvent::Done { history }).await;
            }

            let thought = message
                .reasoning
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| message.content.clone());
            sink.emit(StreamEvent::Thinking { content: thought }).await?;

            let calls = message.tool_calls.clone();
            history.push(message);
            for call in calls {
                sink.check()?;
                sink.emit(StreamEvent::ToolCall {
                    tool_name: call.name().to_string(),
                    tool_call_id: call.id.clone(),
                    tool_args: call.arguments().to_string(),
                })
                .await?;

                let dispatched = sink
                    .guard(self.tools.dispatch(credential, call.name(), call.arguments()))
                    .await?;
                let (output, is_error) = match dispatched {
                    Ok(result) => (result.joined_text(), result.is_error),
                    Err(e) => {
                        warn!(tool = call.name(), code = e.code, error = %e.message, "Tool call rejected");
                        (format!("Error: {}", e.message), true)
                    }
                };

                sink.emit(StreamEvent::ToolResult {
                    tool_name: call.name().to_string(),
                    tool_call_id: call.id.clone(),
                    tool_result: output.clone(),
                    is_error,
                })
                .await?;
                history.push(ChatMessage::tool_result(&call.id, call.name(), output));
            }
        }

        warn!(max_rounds = self.config.max_tool_rounds, "Round limit reached");
        let content = last_text.unwrap_or_else(|| STEP_LIMIT_NOTICE.to_string());
        sink.emit(StreamEvent::Content { content }).await?;
        sink.emit(StreamEvent::Done { history }).await
    }

    /// Compact `history` when it is over `trigger` tokens. The compacted
    /// form is only adopted when it is actually smaller.
    async fn auto_compact(
        &self,
        history: Vec<ChatMessage>,
        trigger: usize,
        sink: &EventSink,
    ) -> Result<Vec<ChatMessage>, Stopped> {
        let tokens = estimate_messages_tokens(&history);
        if tokens <= trigger {
            return Ok(history);
        }

        debug!(tokens, trigger, "History over auto-compaction trigger");
        let result = sink.guard(self.compactor.compact(history.clone(), None)).await?;
        if result.tokens_after >= result.tokens_before {
            if let Some(warning) = &result.warning {
                warn!(%warning, "Auto-compaction skipped");
            }
            return Ok(history);
        }

        sink.emit(StreamEvent::AutoCompact {
            content: format!(
                "Context auto-compacted: {} → {} tokens",
                result.tokens_before, result.tokens_after
            ),
            tokens_before: result.tokens_before,
            tokens_after: result.tokens_after,
        })
        .await?;
        Ok(result.messages)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("default_model", &self.default_model)
            .field("max_tool_rounds", &self.config.max_tool_rounds)
            .finish()
    }
}

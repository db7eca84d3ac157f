//! Agent HTTP API.
//!
//! Endpoints (nested under `/v1/agent`):
//! - `POST /chat`          : run a turn and return the final answer
//! - `POST /chat/stream`   : run a turn as an SSE stream of [`StreamEvent`]s
//! - `GET  /context`       : the caller's active context
//! - `POST /compact`       : summarize a history on request

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crmpilot_agent::{AgentError, ChatRequest, ChatResponse, CompactionResult, StreamEvent};
use crmpilot_context::session_fingerprint;
use crmpilot_core::message::ChatMessage;

use crate::auth::Credential;
use crate::{api_error, ApiResult, SharedState};

pub fn agent_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/context", get(context_handler))
        .route("/compact", post(compact_handler))
        .with_state(state)
}

async fn chat_handler(
    State(state): State<SharedState>,
    Credential(credential): Credential,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    info!(
        session = %session_fingerprint(&credential),
        messages = payload.messages.len(),
        "agent/chat request"
    );

    match state.orchestrator.chat(credential, payload).await {
        Ok(response) => Ok(Json(response)),
        Err(AgentError::Turn(message)) => Err(api_error(StatusCode::BAD_GATEWAY, message)),
        Err(e @ AgentError::Interrupted) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Streams one turn. The turn is cancelled when the client disconnects and
/// the response stream is dropped.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Credential(credential): Credential,
    Json(payload): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    info!(
        session = %session_fingerprint(&credential),
        messages = payload.messages.len(),
        "agent/chat/stream SSE request"
    );

    let cancel = CancellationToken::new();
    let events = state.orchestrator.run_stream(credential, payload, cancel.clone());
    let guard = cancel.drop_guard();

    let stream = futures::stream::unfold((events, guard), |(mut events, guard)| async move {
        let event = events.recv().await?;
        Some((Ok(to_sse(&event)), (events, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &StreamEvent) -> SseEvent {
    let (name, data) = encode_frame(event.event_type(), event);
    SseEvent::default().event(name).data(data)
}

/// Event name and JSON data for one frame. A payload that cannot be encoded
/// becomes an `error` frame instead of an empty one.
fn encode_frame<T: Serialize>(name: &'static str, payload: &T) -> (&'static str, String) {
    match serde_json::to_string(payload) {
        Ok(data) => (name, data),
        Err(e) => {
            warn!(event = name, error = %e, "Could not serialize stream event");
            let error = StreamEvent::Error {
                content: format!("Internal error: could not encode {name} event"),
            };
            (error.event_type(), serde_json::to_string(&error).unwrap_or_default())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ContextQuery {
    #[serde(default)]
    include_content: bool,
}

#[derive(Debug, Serialize)]
struct ContextItemDto {
    path: String,
    token_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContextResponse {
    items: Vec<ContextItemDto>,
    total_tokens: usize,
    system_prompt: String,
}

async fn context_handler(
    State(state): State<SharedState>,
    Credential(credential): Credential,
    Query(query): Query<ContextQuery>,
) -> Json<ContextResponse> {
    let (items, total_tokens) = state
        .contexts
        .get(&credential)
        .map(|session| (session.list_items(), session.total_tokens()))
        .unwrap_or_default();

    Json(ContextResponse {
        items: items
            .into_iter()
            .map(|item| ContextItemDto {
                path: item.path,
                token_size: item.token_size,
                content: query.include_content.then_some(item.content),
            })
            .collect(),
        total_tokens,
        system_prompt: state.orchestrator.system_prompt(&credential),
    })
}

#[derive(Debug, Deserialize)]
struct CompactRequest {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    /// A number of recent messages, or a free-text note on what to keep.
    #[serde(default)]
    keep: Option<serde_json::Value>,
}

impl CompactRequest {
    fn keep(&self) -> Option<String> {
        match self.keep.as_ref()? {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

async fn compact_handler(
    State(state): State<SharedState>,
    Credential(_credential): Credential,
    Json(payload): Json<CompactRequest>,
) -> ApiResult<CompactionResult> {
    if payload.messages.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "messages required"));
    }

    let keep = payload.keep();
    let result = state
        .orchestrator
        .compactor()
        .compact(payload.messages, keep.as_deref())
        .await;
    if let Some(warning) = &result.warning {
        warn!(%warning, "Compaction returned the history unchanged");
    }
    Ok(Json(result))
}

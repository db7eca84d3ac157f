//! End-to-end tests for crmpilot.
//!
//! These assemble the full stack (gateway router, orchestrator, tool bus,
//! context store) over a scripted model and an in-memory record backend,
//! and drive it over HTTP exactly as a browser or MCP client would.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crmpilot_config::AppConfig;
use crmpilot_context::{ContextStore, FsArtifactReader};
use crmpilot_core::error::ProviderError;
use crmpilot_core::message::{ChatMessage, ToolCall};
use crmpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use crmpilot_core::records::ObjectMetadata;
use crmpilot_gateway::{build_router, GatewayState, SharedState};
use crmpilot_tools::testing::MockBackend;

// ── Scripted provider ────────────────────────────────────────────────────

/// Replays responses in order and keeps every request it saw.
struct ScriptedProvider {
    responses: Vec<ProviderResponse>,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ProviderRequest {
        self.seen.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut seen = self.seen.lock().unwrap();
        let n = seen.len();
        seen.push(request);
        match self.responses.get(n) {
            Some(response) => Ok(response.clone()),
            None => panic!("ScriptedProvider exhausted: call #{n}, have {}", self.responses.len()),
        }
    }
}

fn respond(message: ChatMessage) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "e2e-model".into(),
    }
}

fn text(answer: &str) -> ProviderResponse {
    respond(ChatMessage::assistant(answer))
}

fn call(id: &str, name: &str, args: Value, thought: &str) -> ProviderResponse {
    respond(ChatMessage::assistant_with_tools(
        thought,
        vec![ToolCall::new(id, name, args.to_string())],
    ))
}

// ── Stack assembly ───────────────────────────────────────────────────────

fn object(api_name: &str, label: &str) -> ObjectMetadata {
    serde_json::from_value(json!({
        "api_name": api_name,
        "label": label,
        "plural_label": format!("{label}s"),
        "fields": [{"api_name": "name", "label": "Name", "type": "Text"}]
    }))
    .unwrap()
}

struct Stack {
    state: SharedState,
    provider: Arc<ScriptedProvider>,
    backend: Arc<MockBackend>,
}

fn stack_with(config: AppConfig, responses: Vec<ProviderResponse>) -> Stack {
    let provider = ScriptedProvider::new(responses);
    let backend = Arc::new(
        MockBackend::new()
            .with_object(object("account", "Account"))
            .with_object(object("contact", "Contact")),
    );
    let contexts = Arc::new(ContextStore::new(Arc::new(FsArtifactReader::new())));
    let state = Arc::new(GatewayState::new(
        provider.clone(),
        backend.clone(),
        contexts,
        &config,
    ));
    Stack {
        state,
        provider,
        backend,
    }
}

fn stack(responses: Vec<ProviderResponse>) -> Stack {
    stack_with(AppConfig::default(), responses)
}

async fn post(state: &SharedState, uri: &str, token: &str, body: Value) -> (StatusCode, String) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("cookie", format!("auth_token={token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(state: &SharedState, uri: &str, token: &str) -> Value {
    let req = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn call_tool(state: &SharedState, token: &str, name: &str, arguments: Value) -> Value {
    let (status, body) = post(
        state,
        "/mcp",
        token,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": name, "arguments": arguments}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_str(&body).unwrap();
    reply["result"].clone()
}

fn result_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap()
}

/// Parse an SSE body into `(event, data)` pairs.
fn sse_frames(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut event = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(payload).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn agent_creates_a_record_through_the_tool_bus() {
    let s = stack(vec![
        call(
            "call_1",
            "create_record",
            json!({"object_name": "account", "data": {"name": "Initech"}}),
            "I'll create the account.",
        ),
        text("Created Initech."),
    ]);

    let (status, body) = post(
        &s.state,
        "/v1/agent/chat",
        "alice-token",
        json!({"messages": [{"role": "user", "content": "Create an account called Initech"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let reply: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["content"], "Created Initech.");

    let accounts = s.backend.records("account");
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["name"], "Initech");
    assert_eq!(s.backend.last_credential().as_deref(), Some("alice-token"));

    let tool_message = s
        .provider
        .request(1)
        .messages
        .into_iter()
        .find(|m| m.name.as_deref() == Some("create_record"))
        .unwrap();
    assert!(tool_message.content.starts_with("Successfully created account record with ID: rec"));
}

#[tokio::test]
async fn create_without_data_never_reaches_the_backend() {
    let s = stack(vec![
        call("call_1", "create_record", json!({"object_name": "account"}), ""),
        text("I need the record data."),
    ]);

    let (status, body) = post(
        &s.state,
        "/v1/agent/chat/stream",
        "alice-token",
        json!({"messages": [{"role": "user", "content": "make an account"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let frames = sse_frames(&body);
    let result = frames
        .iter()
        .find(|(event, _)| event == "tool_result")
        .map(|(_, data)| data.clone())
        .unwrap();
    assert_eq!(result["is_error"], true);
    assert!(result["tool_result"].as_str().unwrap().contains("data"));
    assert!(!s.backend.calls().contains(&"create_record"));
}

#[tokio::test]
async fn streamed_two_round_turn_keeps_event_order() {
    let s = stack(vec![
        call("c1", "list_objects", json!({}), "First, which objects exist?"),
        call("c2", "query_object", json!({"object_name": "account"}), "Now the accounts."),
        text("There are no accounts yet."),
    ]);

    let (_, body) = post(
        &s.state,
        "/v1/agent/chat/stream",
        "alice-token",
        json!({"messages": [{"role": "user", "content": "Show me my accounts"}]}),
    )
    .await;

    let frames = sse_frames(&body);
    let events: Vec<&str> = frames.iter().map(|(event, _)| event.as_str()).collect();
    assert_eq!(
        events,
        vec![
            "thinking",
            "tool_call",
            "tool_result",
            "thinking",
            "tool_call",
            "tool_result",
            "content",
            "done"
        ]
    );
    for (event, data) in &frames {
        assert_eq!(data["type"], event.as_str());
    }
    let query_result = frames[5].1["tool_result"].as_str().unwrap();
    assert_eq!(query_result, "No records found for account\n");
    assert_eq!(frames[7].1["history"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn backend_failures_surface_as_error_tool_results() {
    let s = stack(vec![
        call("c1", "get_record", json!({"object_name": "account", "id": "rec9"}), "Looking it up."),
        text("The backend is failing."),
    ]);
    s.backend.fail_with(500, "boom");

    let (_, body) = post(
        &s.state,
        "/v1/agent/chat/stream",
        "alice-token",
        json!({"messages": [{"role": "user", "content": "get rec9"}]}),
    )
    .await;
    let frames = sse_frames(&body);
    let (_, result) = frames.iter().find(|(event, _)| event == "tool_result").unwrap();
    assert_eq!(result["is_error"], true);
    assert_eq!(result["tool_result"], "Get failed: api error (500): boom\n");
    assert_eq!(frames.last().unwrap().0, "done");
}

#[tokio::test]
async fn context_files_flow_into_the_system_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("plan.md");
    let notes = dir.path().join("notes.md");
    std::fs::write(&plan, "p".repeat(400)).unwrap();
    std::fs::write(&notes, "n".repeat(80)).unwrap();
    let plan = plan.to_string_lossy().to_string();
    let notes = notes.to_string_lossy().to_string();

    let s = stack(vec![text("I see your plan.")]);

    let added = call_tool(&s.state, "alice-token", "context_add", json!({"files": [&plan, &notes]})).await;
    assert_eq!(added["isError"], false);
    assert!(result_text(&added).starts_with("Added 2 files to context."));

    let context = get(&s.state, "/v1/agent/context", "alice-token").await;
    assert_eq!(context["total_tokens"], 120);
    assert_eq!(context["items"].as_array().unwrap().len(), 2);

    let (status, _) = post(
        &s.state,
        "/v1/agent/chat",
        "alice-token",
        json!({"messages": [{"role": "user", "content": "What's the plan?"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let system = &s.provider.request(0).messages[0];
    assert!(system.content.contains(&format!("--- FILE: {plan} ---")));
    assert!(system.content.contains(&format!("--- FILE: {notes} ---")));

    let removed = call_tool(&s.state, "alice-token", "context_remove", json!({"files": [&plan]})).await;
    assert_eq!(result_text(&removed), "Removed 1 files from context.");
    let context = get(&s.state, "/v1/agent/context", "alice-token").await;
    assert_eq!(context["total_tokens"], 20);

    let other = get(&s.state, "/v1/agent/context", "bob-token").await;
    assert_eq!(other["total_tokens"], 0);
}

#[tokio::test]
async fn deleted_records_can_be_restored_by_their_owner() {
    let s = stack(vec![]);

    let created = call_tool(
        &s.state,
        "alice-token",
        "create_record",
        json!({"object_name": "contact", "data": {"name": "Ada"}}),
    )
    .await;
    let id = result_text(&created).rsplit(' ').next().unwrap().trim().to_string();

    let deleted = call_tool(
        &s.state,
        "alice-token",
        "delete_record",
        json!({"object_name": "contact", "id": &id}),
    )
    .await;
    assert_eq!(deleted["isError"], false);
    assert!(s.backend.records("contact").is_empty());

    let bob_bin = call_tool(&s.state, "bob-token", "list_recycle_bin", json!({})).await;
    assert_eq!(result_text(&bob_bin), "Recycle bin is empty.");

    let alice_bin = call_tool(&s.state, "alice-token", "list_recycle_bin", json!({})).await;
    let listing = result_text(&alice_bin);
    assert!(listing.starts_with("Found 1 items in recycle bin:"));
    let bin_id = listing
        .split('"')
        .skip_while(|part| *part != "id")
        .nth(2)
        .unwrap()
        .to_string();

    let restored = call_tool(&s.state, "alice-token", "restore_record", json!({"id": &bin_id})).await;
    assert_eq!(result_text(&restored), format!("Restored record {bin_id} from recycle bin"));
    assert_eq!(s.backend.records("contact").len(), 1);
    assert_eq!(s.provider.calls(), 0);
}

#[tokio::test]
async fn oversized_history_is_compacted_mid_stream() {
    let mut config = AppConfig::default();
    config.agent.max_context_tokens = 1000;
    config.agent.auto_compact_threshold = 0.5;

    let s = stack_with(
        config,
        vec![
            text("The user asked about three deals."),
            text("Here is where things stand."),
        ],
    );

    let mut messages = Vec::new();
    for turn in 0..3 {
        messages.push(json!({"role": "user", "content": format!("deal {turn}?")}));
        messages.push(json!({"role": "assistant", "content": "d".repeat(1200)}));
    }
    messages.push(json!({"role": "user", "content": "summary please"}));

    let (_, body) = post(&s.state, "/v1/agent/chat/stream", "alice-token", json!({"messages": messages})).await;
    let frames = sse_frames(&body);
    let events: Vec<&str> = frames.iter().map(|(event, _)| event.as_str()).collect();
    assert_eq!(events, vec!["auto_compact", "content", "done"]);

    let compact = &frames[0].1;
    assert!(compact["tokens_after"].as_u64().unwrap() < compact["tokens_before"].as_u64().unwrap());
    assert!(compact["content"].as_str().unwrap().starts_with("Context auto-compacted: "));

    let history = frames[2].1["history"].as_array().unwrap();
    assert!(history[0]["content"].as_str().unwrap().contains("The user asked about three deals."));
}

#[tokio::test]
async fn manual_compaction_of_a_long_history() {
    let s = stack(vec![text("Forty messages about pipeline hygiene.")]);

    let mut messages = vec![json!({"role": "system", "content": "base prompt"})];
    for turn in 0..20 {
        messages.push(json!({"role": "user", "content": format!("question {turn} {}", "q".repeat(200))}));
        messages.push(json!({"role": "assistant", "content": format!("answer {turn} {}", "a".repeat(200))}));
    }

    let (status, body) = post(
        &s.state,
        "/v1/agent/compact",
        "alice-token",
        json!({"messages": messages, "keep": 4}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let result: Value = serde_json::from_str(&body).unwrap();
    let compacted = result["messages"].as_array().unwrap();
    assert_eq!(compacted.len(), 5);
    assert!(compacted[0]["content"].as_str().unwrap().starts_with("base prompt\n\n--- CONVERSATION SUMMARY"));
    assert!(compacted[4]["content"].as_str().unwrap().starts_with("answer 19"));
    assert!(result["tokens_after"].as_u64().unwrap() < result["tokens_before"].as_u64().unwrap());
    assert!(result.get("warning").is_none());
}

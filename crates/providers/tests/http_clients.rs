//! HTTP client tests against a wiremock server.

use std::time::Duration;

use crmpilot_core::error::{BackendError, ProviderError};
use crmpilot_core::message::ChatMessage;
use crmpilot_core::provider::{Provider, ProviderRequest, ToolDefinition};
use crmpilot_core::records::{QueryRequest, Record, RecycleScope, SortDirection};
use crmpilot_core::RecordBackend;
use crmpilot_providers::{OpenAiCompatProvider, RecordApiClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> RecordApiClient {
    RecordApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

fn provider(server: &MockServer, api_key: Option<&str>) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(
        "mock",
        format!("{}/v1/chat/completions", server.uri()),
        api_key.map(String::from),
        Duration::from_secs(5),
    )
    .unwrap()
}

// --- Record backend ---

#[tokio::test]
async fn sends_cookie_and_bearer_and_unwraps_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/metadata/objects/lead"))
        .and(header("cookie", "auth_token=tok-123"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "api_name": "lead",
                "label": "Lead",
                "plural_label": "Leads",
                "fields": [{"api_name": "email", "label": "Email", "type": "Email"}]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let object = backend(&server).describe_object("tok-123", "lead").await.unwrap();
    assert_eq!(object.label, "Lead");
    assert_eq!(object.fields[0].field_type, "Email");
}

#[tokio::test]
async fn create_record_returns_id_from_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/data/lead"))
        .and(body_partial_json(json!({"name": "Ada"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"data": {"id": "lead-7", "name": "Ada"}})))
        .mount(&server)
        .await;

    let mut data = Record::new();
    data.insert("name".into(), json!("Ada"));
    let id = backend(&server).create_record("tok", "lead", &data).await.unwrap();
    assert_eq!(id, "lead-7");
}

#[tokio::test]
async fn create_without_id_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/data/lead"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .mount(&server)
        .await;

    let err = backend(&server)
        .create_record("tok", "lead", &Record::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse(ref m) if m.contains("missing ID")));
}

#[tokio::test]
async fn api_error_uses_message_field() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/data/lead/x1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "record not found"})))
        .mount(&server)
        .await;

    let err = backend(&server).delete_record("tok", "lead", "x1").await.unwrap_err();
    assert_eq!(err.to_string(), "api error (404): record not found");
}

#[tokio::test]
async fn api_error_falls_back_to_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/data/lead/x1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .update_record("tok", "lead", "x1", &Record::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::Api { status: 502, ref message } if message == "upstream unavailable"
    ));
}

#[tokio::test]
async fn query_posts_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/data/query"))
        .and(body_partial_json(json!({
            "object_api_name": "opportunity",
            "sort_field": "amount",
            "sort_direction": "DESC",
            "limit": 20
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "o1"}, {"id": "o2"}]})))
        .mount(&server)
        .await;

    let request = QueryRequest {
        object_api_name: "opportunity".into(),
        filter_expr: None,
        sort_field: Some("amount".into()),
        sort_direction: Some(SortDirection::Desc),
        limit: Some(20),
    };
    let records = backend(&server).query("tok", &request).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["id"], "o2");
}

#[tokio::test]
async fn null_list_payload_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/metadata/dashboards"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
        .mount(&server)
        .await;

    assert!(backend(&server).list_dashboards("tok").await.unwrap().is_empty());
}

#[tokio::test]
async fn scoped_search_and_recycle_bin_use_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data/search/account"))
        .and(query_param("term", "acme corp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "a1"}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/data/recyclebin/items"))
        .and(query_param("scope", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
            {"id": "rb1", "record_id": "a9", "object_api_name": "account"}
        ]})))
        .mount(&server)
        .await;

    let client = backend(&server);
    let hits = client.search_object("tok", "account", "acme corp").await.unwrap();
    assert_eq!(hits[0]["id"], "a1");

    let items = client.list_recycle_bin("tok", RecycleScope::All).await.unwrap();
    assert_eq!(items[0].record_id, "a9");
}

#[tokio::test]
async fn activate_theme_uses_put_and_accepts_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/metadata/themes/dark/activate"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    backend(&server).activate_theme("tok", "dark").await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let client = RecordApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    let err = client.list_objects("tok").await.unwrap_err();
    assert!(matches!(err, BackendError::Network(_)));
}

// --- Model provider ---

#[tokio::test]
async fn completion_parses_tool_calls_and_reasoning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-local"))
        .and(body_partial_json(json!({"model": "nemotron", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "nemotron",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "",
                    "reasoning": "Need the object list first",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "list_objects", "arguments": "{\"query\":\"lead\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 10, "total_tokens": 60}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ProviderRequest::new("nemotron", vec![ChatMessage::user("show leads")]).with_tools(vec![
        ToolDefinition {
            name: "list_objects".into(),
            description: "List objects".into(),
            input_schema: json!({"type": "object"}),
        },
    ]);
    let response = provider(&server, Some("sk-local")).complete(request).await.unwrap();

    assert_eq!(response.message.tool_calls.len(), 1);
    assert_eq!(response.message.tool_calls[0].name(), "list_objects");
    assert_eq!(response.message.reasoning.as_deref(), Some("Need the object list first"));
    assert_eq!(response.usage.unwrap().total_tokens, 60);
}

#[tokio::test]
async fn status_codes_map_to_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let p = provider(&server, None);
    let req = || ProviderRequest::new("m", vec![ChatMessage::user("hi")]);

    assert!(matches!(
        p.complete(req()).await,
        Err(ProviderError::RateLimited { retry_after_secs: 12 })
    ));
    assert!(matches!(p.complete(req()).await, Err(ProviderError::AuthenticationFailed(_))));
    assert!(matches!(
        p.complete(req()).await,
        Err(ProviderError::ApiError { status_code: 500, ref message }) if message == "model crashed"
    ));
}

#[tokio::test]
async fn no_choices_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = provider(&server, None)
        .complete(ProviderRequest::new("m", vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::EmptyResponse));
}

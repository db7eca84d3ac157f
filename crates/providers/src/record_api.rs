//! HTTP client for the CRM backend's REST API.
//!
//! Every request carries the caller's credential twice, as an `auth_token`
//! cookie and as a Bearer header, since backend deployments differ in which
//! one their auth middleware reads. Successful responses wrap their payload
//! in a `{"data": ...}` envelope which is unwrapped here.

use async_trait::async_trait;
use crmpilot_config::BackendConfig;
use crmpilot_core::backend::RecordBackend;
use crmpilot_core::error::BackendError;
use crmpilot_core::records::*;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

type BackendResult<T> = std::result::Result<T, BackendError>;

/// [`RecordBackend`] over the backend's `/api/metadata` and `/api/data` routes.
#[derive(Debug, Clone)]
pub struct RecordApiClient {
    base_url: Url,
    client: reqwest::Client,
}

impl RecordApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> BackendResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::InvalidResponse(format!("invalid backend URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidResponse(format!(
                "backend URL '{base_url}' cannot be used as a base"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.request_timeout_secs))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, credential: &str, segments: &[&str]) -> reqwest::RequestBuilder {
        let url = self.endpoint(segments);
        debug!(method = %method, path = %url.path(), "Backend request");

        let mut builder = self.client.request(method, url);
        if !credential.is_empty() {
            builder = builder
                .header(reqwest::header::COOKIE, format!("auth_token={credential}"))
                .bearer_auth(credential);
        }
        builder
    }

    /// Send a request and return the unwrapped `data` payload.
    ///
    /// Bodies without an envelope are returned whole; empty bodies become
    /// `Value::Null`.
    async fn execute(&self, builder: reqwest::RequestBuilder) -> BackendResult<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(&bytes);
            warn!(status = status.as_u16(), message = %message, "Backend returned error");
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::InvalidResponse(format!("failed to decode response: {e}")))?;

        Ok(match body {
            Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
            other => other,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> BackendResult<T> {
        let payload = self.execute(builder).await?;
        serde_json::from_value(payload)
            .map_err(|e| BackendError::InvalidResponse(format!("unexpected response shape: {e}")))
    }

    /// Like [`Self::fetch`] but treats a null payload as an empty list.
    async fn fetch_list<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> BackendResult<Vec<T>> {
        match self.execute(builder).await? {
            Value::Null => Ok(Vec::new()),
            payload => serde_json::from_value(payload)
                .map_err(|e| BackendError::InvalidResponse(format!("unexpected response shape: {e}"))),
        }
    }

    async fn send_unit(&self, builder: reqwest::RequestBuilder) -> BackendResult<()> {
        self.execute(builder).await.map(|_| ())
    }

    async fn create<B: Serialize + ?Sized>(
        &self,
        credential: &str,
        segments: &[&str],
        body: &B,
        what: &str,
    ) -> BackendResult<String> {
        let payload = self
            .execute(self.request(Method::POST, credential, segments).json(body))
            .await?;
        created_id(&payload).ok_or_else(|| BackendError::InvalidResponse(format!("created {what} missing ID")))
    }
}

/// Human-readable failure text: `message`, else `error`, else the raw body.
fn error_message(body: &[u8]) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(Value::String(text)) = map.get(key)
                && !text.is_empty()
            {
                return text.clone();
            }
        }
    }
    let raw = String::from_utf8_lossy(body).trim().to_string();
    if raw.is_empty() {
        "no details provided".into()
    } else {
        raw
    }
}

fn created_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RecordBackend for RecordApiClient {
    async fn list_objects(&self, credential: &str) -> BackendResult<Vec<ObjectMetadata>> {
        self.fetch_list(self.request(Method::GET, credential, &["api", "metadata", "objects"]))
            .await
    }

    async fn describe_object(&self, credential: &str, object: &str) -> BackendResult<ObjectMetadata> {
        self.fetch(self.request(Method::GET, credential, &["api", "metadata", "objects", object]))
            .await
    }

    async fn create_object(&self, credential: &str, schema: &ObjectMetadata) -> BackendResult<()> {
        self.send_unit(
            self.request(Method::POST, credential, &["api", "metadata", "objects"])
                .json(schema),
        )
        .await
    }

    async fn update_object(&self, credential: &str, object: &str, patch: &ObjectPatch) -> BackendResult<()> {
        self.send_unit(
            self.request(Method::PATCH, credential, &["api", "metadata", "objects", object])
                .json(patch),
        )
        .await
    }

    async fn delete_object(&self, credential: &str, object: &str) -> BackendResult<()> {
        self.send_unit(self.request(Method::DELETE, credential, &["api", "metadata", "objects", object]))
            .await
    }

    async fn create_field(&self, credential: &str, object: &str, field: &FieldMetadata) -> BackendResult<()> {
        self.send_unit(
            self.request(Method::POST, credential, &["api", "metadata", "objects", object, "fields"])
                .json(field),
        )
        .await
    }

    async fn update_field(
        &self,
        credential: &str,
        object: &str,
        field: &str,
        patch: &FieldPatch,
    ) -> BackendResult<()> {
        self.send_unit(
            self.request(
                Method::PATCH,
                credential,
                &["api", "metadata", "objects", object, "fields", field],
            )
            .json(patch),
        )
        .await
    }

    async fn delete_field(&self, credential: &str, object: &str, field: &str) -> BackendResult<()> {
        self.send_unit(self.request(
            Method::DELETE,
            credential,
            &["api", "metadata", "objects", object, "fields", field],
        ))
        .await
    }

    async fn query(&self, credential: &str, request: &QueryRequest) -> BackendResult<Vec<Record>> {
        self.fetch_list(
            self.request(Method::POST, credential, &["api", "data", "query"])
                .json(request),
        )
        .await
    }

    async fn search(&self, credential: &str, term: &str) -> BackendResult<Vec<Value>> {
        self.fetch_list(
            self.request(Method::POST, credential, &["api", "data", "search"])
                .json(&serde_json::json!({ "term": term })),
        )
        .await
    }

    async fn search_object(&self, credential: &str, object: &str, term: &str) -> BackendResult<Vec<Record>> {
        self.fetch_list(
            self.request(Method::GET, credential, &["api", "data", "search", object])
                .query(&[("term", term)]),
        )
        .await
    }

    async fn get_record(&self, credential: &str, object: &str, id: &str) -> BackendResult<Record> {
        self.fetch(self.request(Method::GET, credential, &["api", "data", object, id]))
            .await
    }

    async fn create_record(&self, credential: &str, object: &str, data: &Record) -> BackendResult<String> {
        self.create(credential, &["api", "data", object], data, "record")
            .await
    }

    async fn update_record(&self, credential: &str, object: &str, id: &str, data: &Record) -> BackendResult<()> {
        self.send_unit(
            self.request(Method::PATCH, credential, &["api", "data", object, id])
                .json(data),
        )
        .await
    }

    async fn delete_record(&self, credential: &str, object: &str, id: &str) -> BackendResult<()> {
        self.send_unit(self.request(Method::DELETE, credential, &["api", "data", object, id]))
            .await
    }

    async fn run_analytics(&self, credential: &str, query: &AnalyticsQuery) -> BackendResult<Value> {
        self.execute(
            self.request(Method::POST, credential, &["api", "data", "analytics"])
                .json(query),
        )
        .await
    }

    async fn list_dashboards(&self, credential: &str) -> BackendResult<Vec<DashboardConfig>> {
        self.fetch_list(self.request(Method::GET, credential, &["api", "metadata", "dashboards"]))
            .await
    }

    async fn get_dashboard(&self, credential: &str, id: &str) -> BackendResult<DashboardConfig> {
        self.fetch(self.request(Method::GET, credential, &["api", "metadata", "dashboards", id]))
            .await
    }

    async fn create_dashboard(&self, credential: &str, dashboard: &DashboardCreate) -> BackendResult<String> {
        self.create(credential, &["api", "metadata", "dashboards"], dashboard, "dashboard")
            .await
    }

    async fn update_dashboard(&self, credential: &str, id: &str, patch: &DashboardPatch) -> BackendResult<()> {
        self.send_unit(
            self.request(Method::PATCH, credential, &["api", "metadata", "dashboards", id])
                .json(patch),
        )
        .await
    }

    async fn delete_dashboard(&self, credential: &str, id: &str) -> BackendResult<()> {
        self.send_unit(self.request(Method::DELETE, credential, &["api", "metadata", "dashboards", id]))
            .await
    }

    async fn list_apps(&self, credential: &str) -> BackendResult<Vec<AppDefinition>> {
        self.fetch_list(self.request(Method::GET, credential, &["api", "metadata", "apps"]))
            .await
    }

    async fn create_app(&self, credential: &str, app: &AppDefinition) -> BackendResult<String> {
        self.create(credential, &["api", "metadata", "apps"], app, "app")
            .await
    }

    async fn update_app(&self, credential: &str, id: &str, patch: &AppPatch) -> BackendResult<()> {
        self.send_unit(
            self.request(Method::PATCH, credential, &["api", "metadata", "apps", id])
                .json(patch),
        )
        .await
    }

    async fn delete_app(&self, credential: &str, id: &str) -> BackendResult<()> {
        self.send_unit(self.request(Method::DELETE, credential, &["api", "metadata", "apps", id]))
            .await
    }

    async fn active_theme(&self, credential: &str) -> BackendResult<Value> {
        self.execute(self.request(Method::GET, credential, &["api", "metadata", "theme"]))
            .await
    }

    async fn activate_theme(&self, credential: &str, id: &str) -> BackendResult<()> {
        self.send_unit(self.request(
            Method::PUT,
            credential,
            &["api", "metadata", "themes", id, "activate"],
        ))
        .await
    }

    async fn list_recycle_bin(&self, credential: &str, scope: RecycleScope) -> BackendResult<Vec<RecycleBinItem>> {
        self.fetch_list(
            self.request(Method::GET, credential, &["api", "data", "recyclebin", "items"])
                .query(&[("scope", scope.as_str())]),
        )
        .await
    }

    async fn restore_record(&self, credential: &str, id: &str) -> BackendResult<()> {
        self.send_unit(self.request(
            Method::POST,
            credential,
            &["api", "data", "recyclebin", "restore", id],
        ))
        .await
    }

    async fn purge_record(&self, credential: &str, id: &str) -> BackendResult<()> {
        self.send_unit(self.request(Method::DELETE, credential, &["api", "data", "recyclebin", id]))
            .await
    }
}

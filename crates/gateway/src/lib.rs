//! HTTP gateway for crmpilot.
//!
//! Exposes the agent (chat, SSE streaming, context, compaction), the tool
//! catalog, and a JSON-RPC tool endpoint for external clients.
//!
//! Built on Axum. All handlers share one [`GatewayState`]: the orchestrator,
//! the tool bus and the context store, each constructed once at startup.

pub mod agent_api;
pub mod auth;
pub mod mcp;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crmpilot_agent::{Compactor, Orchestrator};
use crmpilot_config::{AppConfig, ContextConfig, GatewayConfig};
use crmpilot_context::{ContextStore, FsArtifactReader, SessionPolicy};
use crmpilot_core::backend::RecordBackend;
use crmpilot_core::provider::{Provider, ToolDefinition};
use crmpilot_providers::{OpenAiCompatProvider, RecordApiClient};
use crmpilot_tools::ToolBus;

/// Request bodies carry whole conversation histories.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Orchestrator,
    pub tools: ToolBus,
    pub contexts: Arc<ContextStore>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        provider: Arc<dyn Provider>,
        backend: Arc<dyn RecordBackend>,
        contexts: Arc<ContextStore>,
        config: &AppConfig,
    ) -> Self {
        let tools = ToolBus::new(backend, contexts.clone());
        let compactor = Arc::new(Compactor::new(provider.clone(), config.compaction.clone()));
        let orchestrator = Orchestrator::new(
            provider,
            Arc::new(tools.clone()),
            contexts.clone(),
            compactor,
            config.llm.default_model.clone(),
        )
        .with_config(config.agent.clone())
        .with_temperature(config.llm.temperature);

        Self {
            orchestrator,
            tools,
            contexts,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Build the router with every gateway route.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/tools", get(list_tools_handler))
        .route("/mcp", post(mcp::mcp_handler))
        .with_state(state.clone())
        .nest("/v1/agent", agent_api::agent_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// The context store described by `config`: filesystem reader, eviction
/// policy and optional snapshot file.
pub fn context_store_from_config(config: &ContextConfig) -> ContextStore {
    let reader = Arc::new(FsArtifactReader::with_allowed_roots(config.allowed_roots.clone()));
    let store = ContextStore::new(reader).with_policy(SessionPolicy {
        max_sessions: config.max_sessions,
        idle_ttl: Duration::from_secs(config.session_ttl_secs),
    });
    match &config.snapshot_path {
        Some(path) => store.with_snapshot_path(path.clone()),
        None => store,
    }
}

/// Refuse non-loopback hosts unless public binding was explicitly allowed.
pub fn check_bind(config: &GatewayConfig) -> Result<(), String> {
    if config.allow_public_bind || config.host == "localhost" {
        return Ok(());
    }
    match config.host.parse::<IpAddr>() {
        Ok(ip) if ip.is_loopback() => Ok(()),
        _ => Err(format!(
            "refusing to bind to non-loopback host '{}'; set gateway.allow_public_bind = true to allow it",
            config.host
        )),
    }
}

/// Periodically drop idle context sessions until `shutdown` fires. The
/// snapshot is rewritten whenever a sweep evicts something.
pub fn spawn_sweeper(contexts: Arc<ContextStore>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if contexts.evict_idle() > 0 {
                        contexts.persist().await;
                    }
                }
            }
        }
    })
}

/// Resolves on Ctrl-C, or on SIGTERM where signals exist.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

/// Start the gateway HTTP server and run until Ctrl-C or SIGTERM.
///
/// Context sessions are restored from the snapshot file on startup. When a
/// snapshot path is configured the file is rewritten after every context
/// change, after sweeps that evict, and once more on shutdown.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    check_bind(&config.gateway)?;
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(&config.llm)?);
    let backend: Arc<dyn RecordBackend> = Arc::new(RecordApiClient::from_config(&config.backend)?);

    let contexts = Arc::new(context_store_from_config(&config.context));
    match contexts.load_snapshot().await {
        Ok(0) => {}
        Ok(restored) => info!(restored, "Restored context sessions from snapshot"),
        Err(e) => warn!(error = %e, "Could not restore context snapshot; starting empty"),
    }

    let state = Arc::new(GatewayState::new(provider, backend, contexts.clone(), &config));
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        contexts.clone(),
        Duration::from_secs(config.context.sweep_interval_secs),
        shutdown.clone(),
    );

    info!(
        addr = %addr,
        model = %config.llm.default_model,
        tools = state.tools.list_tools().len(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Session sweeper ended abnormally");
    }
    match contexts.save_snapshot().await {
        Ok(0) => {}
        Ok(saved) => info!(saved, "Saved context sessions to snapshot"),
        Err(e) => warn!(error = %e, "Could not save context snapshot"),
    }
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tools: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools: state.tools.registry().len(),
    })
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDefinition>,
    count: usize,
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state.tools.list_tools();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

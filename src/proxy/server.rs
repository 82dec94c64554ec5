//! HTTP server setup and background maintenance.

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::upstream::UpstreamGateway;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::registry::ModelRegistry;
use crate::router::{HealthTracker, ModelSelector};
use crate::session::SessionStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub selector: ModelSelector,
    pub sessions: Arc<SessionStore>,
    pub upstream: Arc<UpstreamGateway>,
}

impl AppState {
    /// Wire up the services for a configuration.
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .user_agent(config.upstream.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(config, http_client, clock))
    }

    pub fn with_client(config: Config, http_client: Client, clock: Arc<dyn Clock>) -> Self {
        let health = Arc::new(HealthTracker::new(
            config.upstream.default_model.clone(),
            config.cooldown(),
            clock.clone(),
        ));
        let registry = Arc::new(ModelRegistry::new(
            http_client.clone(),
            config.registry.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(config.session_ttl(), clock));
        let upstream = Arc::new(UpstreamGateway::new(
            http_client,
            config.upstream.clone(),
            health.clone(),
        ));

        Self {
            config: Arc::new(config),
            selector: ModelSelector::new(registry, health),
            sessions,
            upstream,
        }
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new();
    for path in &state.config.server.chat_paths {
        router = router.route(path, post(handlers::chat_completions));
    }

    router
        // OpenAI-compatible endpoints
        .route("/v1/models", get(handlers::list_models))
        .route("/api/v1/models", get(handlers::list_models))
        // Claude-compatible endpoints
        .route("/v1/messages", post(handlers::messages))
        .route("/api/v1/messages", post(handlers::messages))
        // Gateway extensions
        .route("/v1/session/clear", post(handlers::clear_session))
        .route("/api/v1/session/clear", post(handlers::clear_session))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the periodic jobs: session sweep on the short tick, model refresh
/// and endpoint failover check on the long one.
pub fn spawn_background_tasks(state: &AppState) {
    let sessions = state.sessions.clone();
    let sweep_every = Duration::from_secs(state.config.server.maintenance_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = sessions.sweep();
            tracing::debug!(evicted, remaining = sessions.len(), "Session sweep");
        }
    });

    let selector = state.selector.clone();
    let upstream = state.upstream.clone();
    let reload_every = Duration::from_secs(state.config.registry.reload_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reload_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            selector.refresh().await;
            let probe_model = selector.health().default_model().to_string();
            let endpoint = upstream.reload_check(&probe_model).await;
            tracing::info!(endpoint = %endpoint, "Reload check complete");
        }
    });
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let chat_paths = config.server.chat_paths.clone();

    let state = AppState::new(config, Arc::new(SystemClock))?;

    // Warm the registry so the first request sees discovered models.
    state.selector.refresh().await;
    spawn_background_tasks(&state);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, chat_paths = ?chat_paths, "Starting degpt-gateway");

    axum::serve(listener, app).await?;

    Ok(())
}

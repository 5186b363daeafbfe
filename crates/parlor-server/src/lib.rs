//! HTTP server for the Parlor chat proxy.
//!
//! Routes:
//! - `GET /health`, `GET /api/test`: unauthenticated liveness checks
//! - `POST /api/chat`, `GET /api/models`: behind the bearer-token gate

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use auth::TokenVerifier;
use config::ServerConfig;
use parlor_llm::{LlmClient, LoggingMiddleware, Provider};

/// Shared, read-only application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub llm: Arc<LlmClient>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(llm: LlmClient, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            llm: Arc::new(llm),
            verifier,
        }
    }

    /// Build adapters and the token verifier from process configuration.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let llm = LlmClient::from_settings(config.providers.clone())?.with_middleware(LoggingMiddleware);
        let verifier = config.auth.build_verifier().await?;
        Ok(Self::new(llm, verifier))
    }
}

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/models", get(chat::list_models))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_identity,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/test", get(health::api_test))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind, serve until Ctrl-C, then drain in-flight requests.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config).await?;

    tracing::info!(
        openai_key_exists = state.llm.is_configured(Provider::OpenAi),
        anthropic_key_exists = state.llm.is_configured(Provider::Anthropic),
        auth_configured = state.verifier.is_enabled(),
        "provider credentials checked"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

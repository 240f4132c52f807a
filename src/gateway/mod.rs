//! Axum HTTP surface: bearer auth, the streaming chat endpoint, the
//! non-streaming helper endpoints, and a liveness probe.

pub mod auth;
mod handlers;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::providers::AdapterRegistry;
use crate::store;
use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use handlers::{
    handle_chat_stream, handle_enhance_prompt, handle_generate_example, handle_health,
};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prompts are text, not uploads.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Timeout for the non-streaming routes. The streaming route is exempt: its
/// lifetime is bounded by the orchestrator's stall timeout instead.
pub const HELPER_TIMEOUT_SECS: u64 = 150;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub pool: SqlitePool,
}

pub fn build_router(state: AppState) -> Router {
    let bounded = Router::new()
        .route("/health", get(handle_health))
        .route("/v1/helpers/enhance-prompt", post(handle_enhance_prompt))
        .route(
            "/v1/helpers/generate-example",
            post(handle_generate_example),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(HELPER_TIMEOUT_SECS)));

    Router::new()
        .route("/v1/chat/stream", post(handle_chat_stream))
        .merge(bounded)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .with_state(state)
}

/// Wire everything together and serve until shutdown.
pub async fn run_gateway(config: Config) -> Result<()> {
    let pool = store::connect(&config.database_path).await?;
    let registry = AdapterRegistry::new(&config.providers, &config.completion);
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        registry,
        &config.completion,
    ));

    let state = AppState { orchestrator, pool };

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

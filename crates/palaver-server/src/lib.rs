//! Palaver server library logic.

pub mod api_ws;
pub mod config;
pub mod providers;

use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use palaver_voice::{EngineConfig, FilterManager, PermitPool, ProviderSet, SessionConfig};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use config::Config;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Engine timing and capacity knobs shared by every session.
    pub engine: Arc<EngineConfig>,
    /// Session template cloned for each connection.
    pub session: SessionConfig,
    /// Recognizer connection pool, global across sessions.
    pub pool: Arc<PermitPool>,
    /// Shared utterance filter.
    pub filter: Arc<FilterManager>,
    /// Speech and language providers sessions are wired with.
    pub providers: ProviderSet,
}

impl AppState {
    /// Builds shared state from configuration with the built-in
    /// development providers. Deployments with real vendor adapters
    /// construct the state literally instead.
    pub fn from_config(config: &Config) -> Self {
        AppState {
            engine: Arc::new(config.engine.clone()),
            session: config.session.clone(),
            pool: Arc::new(PermitPool::new(config.pool.capacity)),
            filter: Arc::new(FilterManager::new(&config.filter)),
            providers: providers::dev_provider_set(config),
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(api_ws::session_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

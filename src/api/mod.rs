pub mod errors;
pub mod routes_agent;
pub mod routes_search;
pub mod routes_vectors;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;

use crate::config::Config;
use crate::search::SearchEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub config: Arc<Config>,
}

pub fn router(engine: Arc<SearchEngine>, config: Arc<Config>) -> Router {
    let state = AppState { engine, config };
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/index/add", post(routes_vectors::add))
        .route("/api/v1/index/train", post(routes_vectors::train))
        .route("/api/v1/index/reset", delete(routes_vectors::reset))
        .route("/api/v1/index/stats", get(routes_vectors::stats))
        .route("/api/v1/search", post(routes_search::search))
        .route("/api/v1/agent/stats", get(routes_agent::stats))
        .route("/api/v1/agent/reset", post(routes_agent::reset))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "project": env!("CARGO_PKG_NAME") }))
}

/// Caller deadline derived from the configured request timeout; the core
/// checks it at coarse boundaries only.
pub(crate) fn request_deadline(config: &Config) -> Option<Instant> {
    (config.request_timeout_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(config.request_timeout_ms))
}

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;
use crate::api::{request_deadline, AppState};
use crate::search::types::{Metric, SearchHit, SearchOptions};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub top_k: Option<usize>,
    pub id: Option<String>,
    pub metric: Option<Metric>,
    pub use_index: Option<bool>,
    pub use_agent: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query_id: String,
    pub results: Vec<SearchHit>,
    pub latency_ms: f64,
    pub strategy: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let top_k = payload.top_k.unwrap_or(10);
    if top_k == 0 || top_k > state.config.max_k {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            "top_k invalid",
        ));
    }
    if payload.vector.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            "query vector is empty",
        ));
    }

    let opts = SearchOptions {
        top_k,
        metric: payload.metric.unwrap_or_default(),
        use_index: payload.use_index.unwrap_or(true),
        use_agent: payload.use_agent.unwrap_or(false),
    };
    let deadline = request_deadline(&state.config);
    let engine = state.engine.clone();
    let outcome =
        tokio::task::spawn_blocking(move || engine.search(&payload.vector, opts, deadline))
            .await
            .map_err(|err| ApiError::internal(format!("search task failed: {err}")))??;

    Ok((
        StatusCode::OK,
        Json(SearchResponse {
            query_id: payload.id.unwrap_or_else(|| "default".to_string()),
            results: outcome.results,
            latency_ms: outcome.latency_ms,
            strategy: outcome.strategy,
        }),
    ))
}

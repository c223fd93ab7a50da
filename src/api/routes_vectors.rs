use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::api::errors::ApiError;
use crate::api::{request_deadline, AppState};

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub vectors: Vec<Vec<f32>>,
    pub ids: Vec<i64>,
}

pub async fn add(
    State(state): State<AppState>,
    Json(payload): Json<AddRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.vectors.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            "empty batch",
        ));
    }
    if payload.vectors.len() > state.config.max_vector_batch {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            "batch too large",
        ));
    }
    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.add(&payload.vectors, &payload.ids))
        .await
        .map_err(|err| ApiError::internal(format!("add task failed: {err}")))??;
    Ok((StatusCode::OK, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub n_cells: usize,
}

pub async fn train(
    State(state): State<AppState>,
    Json(payload): Json<TrainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deadline = request_deadline(&state.config);
    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.train(payload.n_cells, deadline))
        .await
        .map_err(|err| ApiError::internal(format!("train task failed: {err}")))??;
    Ok((StatusCode::OK, Json(outcome)))
}

pub async fn reset(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || engine.reset())
        .await
        .map_err(|err| ApiError::internal(format!("reset task failed: {err}")))??;
    Ok((StatusCode::OK, Json(json!({ "ok": true }))))
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(state.engine.stats())))
}

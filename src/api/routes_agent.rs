use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::api::errors::ApiError;
use crate::api::AppState;

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(state.engine.agent_stats())))
}

pub async fn reset(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok((StatusCode::OK, Json(state.engine.agent_reset())))
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::error::EngineError;

pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::InvalidInput(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_argument", err.to_string())
            }
            EngineError::Conflict(_) => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            EngineError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            EngineError::Timeout => Self::new(
                StatusCode::REQUEST_TIMEOUT,
                "deadline_exceeded",
                err.to_string(),
            ),
            EngineError::Storage(_) => {
                tracing::error!(%err, "storage failure surfaced to client");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_failure",
                    err.to_string(),
                )
            }
            EngineError::Corrupt(_) => {
                tracing::error!(%err, "corrupt state surfaced to client");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "corrupt_state",
                    err.to_string(),
                )
            }
        }
    }
}

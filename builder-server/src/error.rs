//! Mapping of library errors onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use builder::error::{JobError, StoreError};
use serde_json::json;
use tracing::error;

/// Error returned by every handler; renders as `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Busy(String),
    /// Detail is logged, never sent to the client.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Busy(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath { .. } => ApiError::Validation(err.to_string()),
            StoreError::NotFound(_) | StoreError::EmptyProject => {
                ApiError::NotFound(err.to_string())
            }
            StoreError::Io { .. } | StoreError::Archive(_) | StoreError::Render(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::EmptyPrompt | JobError::InvalidRecursionLimit { .. } => {
                ApiError::Validation(err.to_string())
            }
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::Busy { .. } => ApiError::Busy(err.to_string()),
            JobError::AlreadyTerminal { .. } | JobError::InvalidTransition { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

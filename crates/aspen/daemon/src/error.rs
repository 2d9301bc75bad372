//! Error types for aspen-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum DaemonError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("server error: {0}")]
    Server(String),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] aspen_store::StoreError),

    /// Engine error
    #[error("engine error: {0}")]
    Engine(#[from] aspen_engine::EngineError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<aspen_store::StoreError> for ApiError {
    fn from(e: aspen_store::StoreError) -> Self {
        match e {
            aspen_store::StoreError::NotFound(msg) => ApiError::NotFound(msg),
            aspen_store::StoreError::Conflict(msg) => ApiError::Conflict(msg),
            aspen_store::StoreError::InvalidData(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<aspen_engine::EngineError> for ApiError {
    fn from(e: aspen_engine::EngineError) -> Self {
        match e {
            aspen_engine::EngineError::AgentNotFound(id) => ApiError::NotFound(id.to_string()),
            aspen_engine::EngineError::Store(inner) => inner.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<aspen_types::ValidationError> for ApiError {
    fn from(e: aspen_types::ValidationError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

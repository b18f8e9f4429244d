//! Error handling utilities for route handlers

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::domain::LedgerError;
use crate::storage::StorageError;

/// Errors a handler can return. Rendered as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    BadRequest(String),
    Unauthorized(&'static str),
    TooManyRequests,
    Internal(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::NotFound(m)
            | ApiError::Forbidden(m)
            | ApiError::Conflict(m)
            | ApiError::BadRequest(m) => m,
            ApiError::TooManyRequests => "too many requests, slow down",
            ApiError::Unauthorized(m) | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(entity) => ApiError::NotFound(format!("{} not found", entity)),
            LedgerError::Forbidden(msg) => ApiError::Forbidden(msg.to_string()),
            LedgerError::Conflict(msg) => ApiError::Conflict(msg.to_string()),
            LedgerError::Validation(msg) => ApiError::BadRequest(msg),
            LedgerError::Storage(e) => {
                error!("Database error: {}", e);
                ApiError::Internal("storage unavailable, please retry")
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::from(err).into()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound("file not found".to_string()),
            other => {
                error!("Blob storage error: {}", other);
                ApiError::Internal("storage unavailable, please retry")
            }
        }
    }
}

// Malformed ids and bodies are validation failures like any other
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Extension trait for logging errors and converting to ApiError
pub trait LogErr<T> {
    /// Log error with context and return a 500
    fn log_500(self, context: &str) -> Result<T, ApiError>;

    /// Log error with context and return the given error
    fn log_status(self, context: &str, status: ApiError) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            error!("{}: {}", context, e);
            ApiError::Internal("internal error")
        })
    }

    fn log_status(self, context: &str, status: ApiError) -> Result<T, ApiError> {
        self.map_err(|e| {
            error!("{}: {}", context, e);
            status
        })
    }
}

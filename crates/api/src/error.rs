use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use worktrack_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds the request-shape errors
/// caught before a handler runs. Implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Request body failed field validation.
    #[error("Invalid request: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Body was not JSON or did not match the expected shape.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", errors.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map each domain error to one stable status and code.
fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND", err.to_string()),
        CoreError::SessionNotFound { .. } => {
            (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", err.to_string())
        }
        CoreError::UserAlreadyInSession(_) => {
            (StatusCode::CONFLICT, "USER_ALREADY_IN_SESSION", err.to_string())
        }
        CoreError::SessionAlreadyCompleted(_) => {
            (StatusCode::CONFLICT, "SESSION_ALREADY_COMPLETED", err.to_string())
        }
        CoreError::InvalidDuration => {
            (StatusCode::BAD_REQUEST, "INVALID_DURATION", err.to_string())
        }
        CoreError::InvalidExtension { .. } => {
            (StatusCode::BAD_REQUEST, "INVALID_EXTENSION", err.to_string())
        }
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::StorageUnavailable(msg) => {
            tracing::warn!(error = %msg, "Storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
                "Storage is temporarily unavailable, retry later".to_string(),
            )
        }
        CoreError::StorageConflict(msg) => {
            tracing::warn!(error = %msg, "Storage conflict");
            (
                StatusCode::CONFLICT,
                "STORAGE_CONFLICT",
                "Concurrent update, retry later".to_string(),
            )
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatch_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and implements [`IntoResponse`] to produce
/// `{ "error", "code" }` bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(errors.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError::Core(core) = &self;
        let (status, code, message) = match core {
            CoreError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} with id {id} not found"),
            ),
            CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            CoreError::NoCandidates { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_CANDIDATES",
                "No providers available".to_string(),
            ),
            CoreError::StaleAttempt { .. } => (
                StatusCode::CONFLICT,
                "STALE_ATTEMPT",
                "Offer no longer available".to_string(),
            ),
            CoreError::ConcurrencyConflict(msg) => {
                (StatusCode::CONFLICT, "CONCURRENCY_CONFLICT", msg.clone())
            }
            CoreError::TerminalState { .. } => {
                (StatusCode::CONFLICT, "TERMINAL_STATE", core.to_string())
            }
            CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            CoreError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal core error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

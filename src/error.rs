// Crate-wide error types and their mapping onto the HTTP boundary.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Errors raised by the two storage backends (C1/C2), unified behind one
/// kind so the Hybrid Store Facade can route failures uniformly.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the LLM gateway (C4).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request to LLM provider failed: {0}")]
    Request(String),
    #[error("LLM response failed schema validation: {0}")]
    Schema(String),
    #[error("LLM stream closed without a terminal envelope")]
    StreamClosedEarly,
}

/// The single error type returned at the API boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("rate limit exceeded")]
    RateLimited(crate::action::rate_limit::RateLimitInfo),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self {
            ApiError::RateLimited(info) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "rate_limit_exceeded",
                    "rate_limit_info": info,
                    "message": "You have exceeded the action rate limit. Please wait before acting again.",
                }),
            ),
            ApiError::Storage(StorageError::NotFound(m)) => {
                (StatusCode::NOT_FOUND, json!({ "error": m }))
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, json!({ "error": m })),
            ApiError::Storage(StorageError::Unavailable(m)) => {
                tracing::warn!("storage unavailable: {m}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "storage backend unavailable" }),
                )
            }
            ApiError::Storage(e) => {
                tracing::error!("storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
            ApiError::Llm(e) => {
                tracing::error!("llm gateway error: {e}");
                (StatusCode::BAD_GATEWAY, json!({ "error": e.to_string() }))
            }
            ApiError::InvalidInput(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized" }),
            ),
            ApiError::Internal(m) => {
                tracing::error!("internal error: {m}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

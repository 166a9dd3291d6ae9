//! Error responses for the ingress API, grounded on the facilitator's `IntoResponse` pattern.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Errors surfaced by the ingress handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request body failed shape validation (bad address, bad amount, etc.).
    #[error("invalid request")]
    InvalidInput(Vec<String>),

    /// The referenced transfer does not exist.
    #[error("transfer not found")]
    NotFound,

    /// Per-client rate limit exceeded; carries the retry-after hint in seconds.
    #[error("rate limit exceeded")]
    RateLimited(u64),

    /// Admin credential missing or incorrect.
    #[error("unauthorized")]
    Unauthorized,

    /// The store is unreachable; the service is degraded rather than crashed.
    #[error("service unavailable")]
    Unavailable,

    /// Any other store/internal failure; message is logged, not echoed to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<relayer_store::error::StoreError> for ApiError {
    fn from(err: relayer_store::error::StoreError) -> Self {
        match err {
            relayer_store::error::StoreError::NotFound => Self::NotFound,
            relayer_store::error::StoreError::DuplicateNonce => Self::InvalidInput(vec!["nonce already used".into()]),
            relayer_store::error::StoreError::Unavailable(_) => Self::Unavailable,
            relayer_store::error::StoreError::Database(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidInput(errors) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({"success": false, "errors": errors}))).into_response(),
            Self::NotFound => (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "not found"}))).into_response(),
            Self::RateLimited(retry_after) => {
                (StatusCode::TOO_MANY_REQUESTS, Json(serde_json::json!({"error": "rate limit exceeded", "retryAfter": retry_after}))).into_response()
            }
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "unauthorized"}))).into_response(),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"error": "store unavailable"}))).into_response(),
            Self::Internal(message) => {
                tracing::error!(message, "internal ingress error");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": "internal error"}))).into_response()
            }
        }
    }
}

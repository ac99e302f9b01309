//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Command rejected by the pipeline or the aggregate.
    Domain(DomainError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::EmptyCommandId => StatusCode::BAD_REQUEST,
        DomainError::AggregateDoesNotExist { .. } => StatusCode::NOT_FOUND,
        DomainError::CommandAlreadyHandled { .. } | DomainError::AggregateVersionMismatch { .. } => {
            StatusCode::CONFLICT
        }
        DomainError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            tracing::error!(error = %err, "command failed unexpectedly");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<event_store::StoreError> for ApiError {
    fn from(err: event_store::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

//! API error types with HTTP response mapping.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use saga::{BreakerSettingsError, CheckoutError, ErrorKind, TransportError};
use session_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    /// Orchestrator error, mapped by kind.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Checkout(err) => {
                let status = status_for(err.kind());
                let retry_after = err.retry_after();
                if status.is_server_error() {
                    tracing::warn!(error = %err, %status, "checkout request failed");
                }
                (status, err.to_string(), retry_after)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = serde_json::json!({ "error": message });
        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            let seconds = retry_after.map_or(1, |wait| wait.as_secs_f64().ceil().max(1.0) as u64);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Gone => StatusCode::GONE,
        ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Downstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

/// Failure while wiring the application state at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("session store: {0}")]
    Store(#[from] StoreError),

    #[error("http client: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Breaker(#[from] BreakerSettingsError),
}

//! HTTP transport capability used by the downstream step clients.
//!
//! Clients only see [`HttpTransport`]; the production stack is a
//! [`ReqwestTransport`] wrapped in a [`CircuitBreakerTransport`], and tests can
//! substitute any implementation.

pub mod circuit_breaker;
pub mod client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::context::{CallContext, ContextError};

pub use circuit_breaker::{
    BreakerSettings, BreakerSettingsError, CircuitBreaker, CircuitBreakerTransport, CircuitState,
    Clock, MockClock, SystemClock,
};
pub use client::{ReqwestTransport, ReqwestTransportBuilder};

/// Longest response body excerpt kept in error messages.
const BODY_EXCERPT_LIMIT: usize = 512;

/// An outbound request. A JSON body is sent with `Content-Type: application/json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// A POST with no body.
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST carrying `body` encoded as JSON.
    pub fn post_json<T: Serialize + ?Sized>(
        url: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut request = Self::post(url);
        request.body = Some(serde_json::to_vec(body)?);
        Ok(request)
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A downstream response with its body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 5xx statuses.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// A lossy, length-capped rendering of the body for error messages.
    pub fn body_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let trimmed = text.trim();
        match trimmed.char_indices().nth(BODY_EXCERPT_LIMIT) {
            Some((cut, _)) => format!("{}...", &trimmed[..cut]),
            None => trimmed.to_string(),
        }
    }
}

/// Failures below the HTTP status level.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The breaker guarding this destination is rejecting calls.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns true for the breaker's fast-fail rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Suggested wait before retrying, when the breaker knows one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Sends one request and returns the raw response.
///
/// Implementations must respect the context's deadline and cancellation.
/// Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        (**self).execute(ctx, request).await
    }
}

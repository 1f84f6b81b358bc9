//! Downstream service capabilities used by the checkout saga.
//!
//! Each capability has an HTTP implementation generic over
//! [`HttpTransport`](crate::transport::HttpTransport) and an in-memory
//! implementation with failure injection for tests.

pub mod inventory;
pub mod order;
pub mod payment;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::context::CallContext;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

pub use inventory::{
    HttpInventoryService, InMemoryInventoryService, InventoryService, ReleaseInventoryRequest,
    ReserveInventoryRequest, ReserveInventoryResponse, ReserveItem,
};
pub use order::{
    CreateOrderRequest, CreateOrderResponse, HttpOrderService, InMemoryOrderService, OrderLine,
    OrderService,
};
pub use payment::{
    HttpPaymentService, InMemoryPaymentService, InitiatePaymentRequest, InitiatePaymentResponse,
    PaymentService,
};

pub const INVENTORY_SERVICE: &str = "inventory";
pub const ORDER_SERVICE: &str = "order";
pub const PAYMENT_SERVICE: &str = "payment";

/// Statuses accepted from create-style endpoints.
const CREATED: &[u16] = &[200, 201];
/// Statuses accepted from release/cancel endpoints.
const ACKNOWLEDGED: &[u16] = &[200, 204];

/// Failure talking to a downstream service.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("{service} service call failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("{service} service returned status {status}: {body}")]
    UnexpectedStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid response from {service} service: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },

    #[error("failed to encode {service} request: {source}")]
    Encode {
        service: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DownstreamError {
    pub fn transport(service: &'static str, source: impl Into<TransportError>) -> Self {
        Self::Transport {
            service,
            source: source.into(),
        }
    }

    /// Which downstream service produced the error.
    pub fn service(&self) -> &'static str {
        match self {
            Self::Transport { service, .. }
            | Self::UnexpectedStatus { service, .. }
            | Self::InvalidResponse { service, .. }
            | Self::Encode { service, .. } => *service,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_circuit_open())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Downstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Builds a URL from a base that may or may not carry a trailing slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

pub(crate) fn json_request<B: Serialize + ?Sized>(
    service: &'static str,
    url: String,
    body: &B,
) -> Result<HttpRequest, DownstreamError> {
    HttpRequest::post_json(url, body).map_err(|source| DownstreamError::Encode { service, source })
}

/// Sends `request` and checks the status against `accepted`.
pub(crate) async fn send<T: HttpTransport + ?Sized>(
    transport: &T,
    ctx: &CallContext,
    service: &'static str,
    request: HttpRequest,
    accepted: &[u16],
) -> Result<HttpResponse, DownstreamError> {
    let response = transport
        .execute(ctx, request)
        .await
        .map_err(|source| DownstreamError::Transport { service, source })?;

    if !accepted.contains(&response.status) {
        return Err(DownstreamError::UnexpectedStatus {
            service,
            status: response.status,
            body: response.body_excerpt(),
        });
    }
    Ok(response)
}

pub(crate) fn decode<R: DeserializeOwned>(
    service: &'static str,
    response: &HttpResponse,
) -> Result<R, DownstreamError> {
    response
        .json()
        .map_err(|err| DownstreamError::InvalidResponse {
            service,
            reason: err.to_string(),
        })
}

/// A downstream call observed by the in-memory services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownstreamCall {
    ReserveInventory,
    ReleaseInventory(Vec<String>),
    CreateOrder,
    CancelOrder(String),
    InitiatePayment(String),
}

/// Shared, ordered record of downstream calls across in-memory services.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DownstreamCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: DownstreamCall) {
        self.lock().push(call);
    }

    /// Snapshot of every call in arrival order.
    pub fn calls(&self) -> Vec<DownstreamCall> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DownstreamCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Recovers the guard from a poisoned lock; in-memory state stays usable for
/// the remaining assertions of a test that panicked elsewhere.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

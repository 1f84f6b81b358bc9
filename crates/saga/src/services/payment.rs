//! Payment service: starts the charge for a created order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::{CheckoutDomainError, CheckoutSession};
use serde::{Deserialize, Serialize};

use super::{
    CREATED, CallLog, DownstreamCall, DownstreamError, PAYMENT_SERVICE, decode, join_url,
    json_request, lock, send,
};
use crate::context::CallContext;
use crate::transport::HttpTransport;

const PAYMENTS_PATH: &str = "/api/payments";

/// `POST /api/payments` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: String,
    pub user_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
}

impl InitiatePaymentRequest {
    /// Charges the session total against its recorded order.
    pub fn from_session(session: &CheckoutSession) -> Result<Self, CheckoutDomainError> {
        let order_id = session
            .order_id
            .clone()
            .ok_or(CheckoutDomainError::MissingField { field: "order_id" })?;
        let payment_method = session
            .payment_method
            .as_ref()
            .ok_or(CheckoutDomainError::MissingField {
                field: "payment_method",
            })?;

        Ok(Self {
            order_id,
            user_id: session.user_id.as_str().to_string(),
            amount: session.total_amount.minor_units(),
            currency: session.currency.as_str().to_string(),
            payment_method: payment_method.as_str().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: String,
}

/// Payment initiation capability. Payments have no compensating call.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Starts a payment and returns its id.
    async fn initiate_payment(
        &self,
        ctx: &CallContext,
        request: &InitiatePaymentRequest,
    ) -> Result<String, DownstreamError>;
}

#[async_trait]
impl<T: PaymentService + ?Sized> PaymentService for Arc<T> {
    async fn initiate_payment(
        &self,
        ctx: &CallContext,
        request: &InitiatePaymentRequest,
    ) -> Result<String, DownstreamError> {
        (**self).initiate_payment(ctx, request).await
    }
}

/// Payment client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPaymentService<T> {
    base_url: String,
    transport: T,
}

impl<T: HttpTransport> HttpPaymentService<T> {
    pub fn new(base_url: impl Into<String>, transport: T) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }
}

#[async_trait]
impl<T: HttpTransport> PaymentService for HttpPaymentService<T> {
    #[tracing::instrument(skip(self, ctx, request), fields(order_id = %request.order_id, amount = request.amount))]
    async fn initiate_payment(
        &self,
        ctx: &CallContext,
        request: &InitiatePaymentRequest,
    ) -> Result<String, DownstreamError> {
        let http = json_request(
            PAYMENT_SERVICE,
            join_url(&self.base_url, PAYMENTS_PATH),
            request,
        )?;
        let response = send(&self.transport, ctx, PAYMENT_SERVICE, http, CREATED).await?;
        let body: InitiatePaymentResponse = decode(PAYMENT_SERVICE, &response)?;
        Ok(body.payment_id)
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: Vec<(String, InitiatePaymentRequest)>,
    fail_on_initiate: bool,
    delay: Option<Duration>,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
    log: CallLog,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records calls into a log shared with other services.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Makes initiate calls fail with a 402.
    pub fn set_fail_on_initiate(&self, fail: bool) {
        lock(&self.state).fail_on_initiate = fail;
    }

    /// Delays every initiate call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.state).delay = delay;
    }

    /// Returns the number of payments started.
    pub fn payment_count(&self) -> usize {
        lock(&self.state).payments.len()
    }

    /// Returns the request a payment was started from.
    pub fn payment(&self, payment_id: &str) -> Option<InitiatePaymentRequest> {
        lock(&self.state)
            .payments
            .iter()
            .find(|(id, _)| id == payment_id)
            .map(|(_, request)| request.clone())
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn initiate_payment(
        &self,
        _ctx: &CallContext,
        request: &InitiatePaymentRequest,
    ) -> Result<String, DownstreamError> {
        self.log
            .record(DownstreamCall::InitiatePayment(request.order_id.clone()));

        let delay = lock(&self.state).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.fail_on_initiate {
            return Err(DownstreamError::UnexpectedStatus {
                service: PAYMENT_SERVICE,
                status: 402,
                body: "payment declined".to_string(),
            });
        }

        let payment_id = format!("PAY-{:04}", state.payments.len() + 1);
        state.payments.push((payment_id.clone(), request.clone()));
        Ok(payment_id)
    }
}

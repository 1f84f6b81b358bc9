//! Order service: creates and cancels the order backing a checkout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::CheckoutId;
use domain::{CheckoutDomainError, CheckoutSession, ShippingAddress};
use serde::{Deserialize, Serialize};

use super::{
    ACKNOWLEDGED, CREATED, CallLog, DownstreamCall, DownstreamError, ORDER_SERVICE, decode,
    join_url, json_request, lock, send,
};
use crate::context::CallContext;
use crate::transport::{HttpRequest, HttpTransport};

const ORDERS_PATH: &str = "/api/orders";

/// A line on the order, copied from the checkout item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub variant_id: String,
    pub name: String,
    pub sku: String,
    pub price: i64,
    pub quantity: u32,
}

/// `POST /api/orders` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderLine>,
    pub currency: String,
    pub subtotal_amount: i64,
    pub total_amount: i64,
    pub shipping_address: ShippingAddress,
    pub checkout_id: CheckoutId,
}

impl CreateOrderRequest {
    /// Builds the order from a session; the shipping address must be set.
    pub fn from_session(session: &CheckoutSession) -> Result<Self, CheckoutDomainError> {
        let shipping_address =
            session
                .shipping_address
                .clone()
                .ok_or(CheckoutDomainError::MissingField {
                    field: "shipping_address",
                })?;

        Ok(Self {
            user_id: session.user_id.as_str().to_string(),
            items: session
                .items
                .iter()
                .map(|item| OrderLine {
                    product_id: item.product_id.as_str().to_string(),
                    variant_id: item.variant_id.as_str().to_string(),
                    name: item.name.clone(),
                    sku: item.sku.clone(),
                    price: item.price.minor_units(),
                    quantity: item.quantity,
                })
                .collect(),
            currency: session.currency.as_str().to_string(),
            subtotal_amount: session.subtotal_amount.minor_units(),
            total_amount: session.total_amount.minor_units(),
            shipping_address,
            checkout_id: session.id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
}

/// Order lifecycle capability.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Creates an order and returns its id.
    async fn create_order(
        &self,
        ctx: &CallContext,
        request: &CreateOrderRequest,
    ) -> Result<String, DownstreamError>;

    /// Cancels an order created earlier in the saga.
    async fn cancel_order(&self, ctx: &CallContext, order_id: &str)
    -> Result<(), DownstreamError>;
}

#[async_trait]
impl<T: OrderService + ?Sized> OrderService for Arc<T> {
    async fn create_order(
        &self,
        ctx: &CallContext,
        request: &CreateOrderRequest,
    ) -> Result<String, DownstreamError> {
        (**self).create_order(ctx, request).await
    }

    async fn cancel_order(
        &self,
        ctx: &CallContext,
        order_id: &str,
    ) -> Result<(), DownstreamError> {
        (**self).cancel_order(ctx, order_id).await
    }
}

/// Order client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOrderService<T> {
    base_url: String,
    transport: T,
}

impl<T: HttpTransport> HttpOrderService<T> {
    pub fn new(base_url: impl Into<String>, transport: T) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }
}

#[async_trait]
impl<T: HttpTransport> OrderService for HttpOrderService<T> {
    #[tracing::instrument(skip(self, ctx, request), fields(checkout_id = %request.checkout_id))]
    async fn create_order(
        &self,
        ctx: &CallContext,
        request: &CreateOrderRequest,
    ) -> Result<String, DownstreamError> {
        let http = json_request(ORDER_SERVICE, join_url(&self.base_url, ORDERS_PATH), request)?;
        let response = send(&self.transport, ctx, ORDER_SERVICE, http, CREATED).await?;
        let body: CreateOrderResponse = decode(ORDER_SERVICE, &response)?;
        Ok(body.order_id)
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn cancel_order(
        &self,
        ctx: &CallContext,
        order_id: &str,
    ) -> Result<(), DownstreamError> {
        let url = join_url(&self.base_url, &format!("{ORDERS_PATH}/{order_id}/cancel"));
        send(
            &self.transport,
            ctx,
            ORDER_SERVICE,
            HttpRequest::post(url),
            ACKNOWLEDGED,
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<String, CreateOrderRequest>,
    cancelled: Vec<String>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_cancel: bool,
}

/// In-memory order service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<Mutex<InMemoryOrderState>>,
    log: CallLog,
}

impl InMemoryOrderService {
    /// Creates a new in-memory order service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records calls into a log shared with other services.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Makes create calls fail with a 500.
    pub fn set_fail_on_create(&self, fail: bool) {
        lock(&self.state).fail_on_create = fail;
    }

    /// Makes cancel calls fail with a 503.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        lock(&self.state).fail_on_cancel = fail;
    }

    /// Returns the number of orders created and not cancelled.
    pub fn active_order_count(&self) -> usize {
        let state = lock(&self.state);
        state.orders.len() - state.cancelled.len()
    }

    /// Returns true if the given order was cancelled.
    pub fn is_cancelled(&self, order_id: &str) -> bool {
        lock(&self.state).cancelled.iter().any(|id| id == order_id)
    }

    /// Returns the request an order was created from.
    pub fn order(&self, order_id: &str) -> Option<CreateOrderRequest> {
        lock(&self.state).orders.get(order_id).cloned()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn create_order(
        &self,
        _ctx: &CallContext,
        request: &CreateOrderRequest,
    ) -> Result<String, DownstreamError> {
        self.log.record(DownstreamCall::CreateOrder);

        let mut state = lock(&self.state);
        if state.fail_on_create {
            return Err(DownstreamError::UnexpectedStatus {
                service: ORDER_SERVICE,
                status: 500,
                body: "order service error".to_string(),
            });
        }

        state.next_id += 1;
        let order_id = format!("ORD-{:04}", state.next_id);
        state.orders.insert(order_id.clone(), request.clone());
        Ok(order_id)
    }

    async fn cancel_order(
        &self,
        _ctx: &CallContext,
        order_id: &str,
    ) -> Result<(), DownstreamError> {
        self.log
            .record(DownstreamCall::CancelOrder(order_id.to_string()));

        let mut state = lock(&self.state);
        if state.fail_on_cancel {
            return Err(DownstreamError::UnexpectedStatus {
                service: ORDER_SERVICE,
                status: 503,
                body: "order service unavailable".to_string(),
            });
        }
        if state.orders.contains_key(order_id) && !state.cancelled.iter().any(|id| id == order_id)
        {
            state.cancelled.push(order_id.to_string());
        }
        Ok(())
    }
}

//! Inventory service: stock reservations for checkout items.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::CheckoutId;
use domain::CheckoutSession;
use serde::{Deserialize, Serialize};

use super::{
    ACKNOWLEDGED, CREATED, CallLog, DownstreamCall, DownstreamError, INVENTORY_SERVICE, decode,
    join_url, json_request, lock, send,
};
use crate::context::CallContext;
use crate::transport::HttpTransport;

const RESERVE_PATH: &str = "/api/inventory/reserve";
const RELEASE_PATH: &str = "/api/inventory/release";

/// One variant to hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveItem {
    pub variant_id: String,
    pub quantity: u32,
}

/// `POST /api/inventory/reserve` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveInventoryRequest {
    pub items: Vec<ReserveItem>,
    pub checkout_id: CheckoutId,
}

impl ReserveInventoryRequest {
    /// One entry per session item, in item order.
    pub fn from_session(session: &CheckoutSession) -> Self {
        Self {
            items: session
                .items
                .iter()
                .map(|item| ReserveItem {
                    variant_id: item.variant_id.as_str().to_string(),
                    quantity: item.quantity,
                })
                .collect(),
            checkout_id: session.id,
        }
    }
}

/// Reservation ids are positional: the i-th id holds the i-th item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveInventoryResponse {
    pub reservation_ids: Vec<String>,
}

/// `POST /api/inventory/release` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInventoryRequest {
    pub reservation_ids: Vec<String>,
}

/// Stock reservation capability.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Holds stock for every item and returns one reservation id per item.
    async fn reserve(
        &self,
        ctx: &CallContext,
        request: &ReserveInventoryRequest,
    ) -> Result<Vec<String>, DownstreamError>;

    /// Releases previously made reservations.
    async fn release(
        &self,
        ctx: &CallContext,
        reservation_ids: &[String],
    ) -> Result<(), DownstreamError>;
}

#[async_trait]
impl<T: InventoryService + ?Sized> InventoryService for Arc<T> {
    async fn reserve(
        &self,
        ctx: &CallContext,
        request: &ReserveInventoryRequest,
    ) -> Result<Vec<String>, DownstreamError> {
        (**self).reserve(ctx, request).await
    }

    async fn release(
        &self,
        ctx: &CallContext,
        reservation_ids: &[String],
    ) -> Result<(), DownstreamError> {
        (**self).release(ctx, reservation_ids).await
    }
}

/// Inventory client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInventoryService<T> {
    base_url: String,
    transport: T,
}

impl<T: HttpTransport> HttpInventoryService<T> {
    pub fn new(base_url: impl Into<String>, transport: T) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }
}

#[async_trait]
impl<T: HttpTransport> InventoryService for HttpInventoryService<T> {
    #[tracing::instrument(skip(self, ctx, request), fields(checkout_id = %request.checkout_id, items = request.items.len()))]
    async fn reserve(
        &self,
        ctx: &CallContext,
        request: &ReserveInventoryRequest,
    ) -> Result<Vec<String>, DownstreamError> {
        let http = json_request(
            INVENTORY_SERVICE,
            join_url(&self.base_url, RESERVE_PATH),
            request,
        )?;
        let response = send(&self.transport, ctx, INVENTORY_SERVICE, http, CREATED).await?;
        let body: ReserveInventoryResponse = decode(INVENTORY_SERVICE, &response)?;
        Ok(body.reservation_ids)
    }

    #[tracing::instrument(skip(self, ctx), fields(count = reservation_ids.len()))]
    async fn release(
        &self,
        ctx: &CallContext,
        reservation_ids: &[String],
    ) -> Result<(), DownstreamError> {
        let body = ReleaseInventoryRequest {
            reservation_ids: reservation_ids.to_vec(),
        };
        let http = json_request(
            INVENTORY_SERVICE,
            join_url(&self.base_url, RELEASE_PATH),
            &body,
        )?;
        send(&self.transport, ctx, INVENTORY_SERVICE, http, ACKNOWLEDGED).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, (CheckoutId, ReserveItem)>,
    next_id: u32,
    fail_on_reserve: bool,
    fail_on_release: bool,
    drop_last_reservation: bool,
    reserve_delay: Option<Duration>,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
    log: CallLog,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records calls into a log shared with other services.
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Makes reserve calls fail with a 409.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        lock(&self.state).fail_on_reserve = fail;
    }

    /// Makes release calls fail with a 503.
    pub fn set_fail_on_release(&self, fail: bool) {
        lock(&self.state).fail_on_release = fail;
    }

    /// Returns one reservation id fewer than requested.
    pub fn set_drop_last_reservation(&self, drop: bool) {
        lock(&self.state).drop_last_reservation = drop;
    }

    /// Delays every reserve call.
    pub fn set_reserve_delay(&self, delay: Option<Duration>) {
        lock(&self.state).reserve_delay = delay;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        lock(&self.state).reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        lock(&self.state).reservations.contains_key(reservation_id)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        _ctx: &CallContext,
        request: &ReserveInventoryRequest,
    ) -> Result<Vec<String>, DownstreamError> {
        self.log.record(DownstreamCall::ReserveInventory);

        let delay = lock(&self.state).reserve_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.fail_on_reserve {
            return Err(DownstreamError::UnexpectedStatus {
                service: INVENTORY_SERVICE,
                status: 409,
                body: "insufficient stock".to_string(),
            });
        }

        let mut reservation_ids = Vec::with_capacity(request.items.len());
        for item in &request.items {
            state.next_id += 1;
            let reservation_id = format!("RES-{:04}", state.next_id);
            state
                .reservations
                .insert(reservation_id.clone(), (request.checkout_id, item.clone()));
            reservation_ids.push(reservation_id);
        }

        if state.drop_last_reservation {
            if let Some(dropped) = reservation_ids.pop() {
                state.reservations.remove(&dropped);
            }
        }

        Ok(reservation_ids)
    }

    async fn release(
        &self,
        _ctx: &CallContext,
        reservation_ids: &[String],
    ) -> Result<(), DownstreamError> {
        self.log
            .record(DownstreamCall::ReleaseInventory(reservation_ids.to_vec()));

        let mut state = lock(&self.state);
        if state.fail_on_release {
            return Err(DownstreamError::UnexpectedStatus {
                service: INVENTORY_SERVICE,
                status: 503,
                body: "inventory unavailable".to_string(),
            });
        }
        for reservation_id in reservation_ids {
            state.reservations.remove(reservation_id);
        }
        Ok(())
    }
}

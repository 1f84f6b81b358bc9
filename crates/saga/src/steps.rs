//! The three checkout saga steps and the state they share.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::{CheckoutSession, SagaStepName};

use crate::context::CallContext;
use crate::engine::{Step, StepError};
use crate::services::{
    CreateOrderRequest, DownstreamError, INVENTORY_SERVICE, InitiatePaymentRequest,
    InventoryService, ORDER_SERVICE, OrderService, PAYMENT_SERVICE, PaymentService,
    ReserveInventoryRequest,
};

/// Mutable state threaded through a checkout saga run.
#[derive(Debug, Clone)]
pub struct CheckoutRun {
    pub session: CheckoutSession,
    /// The caller's context; each step derives its own bound from it.
    pub ctx: CallContext,
}

/// Runs a downstream call within `ctx`, reporting a missed deadline or a
/// cancellation as a transport failure of `service`.
async fn within<T, F>(ctx: &CallContext, service: &'static str, call: F) -> Result<T, DownstreamError>
where
    F: Future<Output = Result<T, DownstreamError>>,
{
    match ctx.run(call).await {
        Ok(result) => result,
        Err(err) => Err(DownstreamError::transport(service, err)),
    }
}

/// Holds stock for every item. Compensation releases it.
pub struct ReserveInventory<'a, I> {
    inventory: &'a I,
    timeout: Option<Duration>,
}

impl<'a, I: InventoryService> ReserveInventory<'a, I> {
    pub fn new(inventory: &'a I, timeout: Option<Duration>) -> Self {
        Self { inventory, timeout }
    }

    /// Best-effort release of reservations that will not be recorded.
    async fn release_unrecorded(&self, reservation_ids: &[String]) {
        let ctx = CallContext::detached(self.timeout);
        if let Err(error) = within(
            &ctx,
            INVENTORY_SERVICE,
            self.inventory.release(&ctx, reservation_ids),
        )
        .await
        {
            tracing::error!(
                reservation_ids = ?reservation_ids,
                error = %error,
                "failed to release reservations from a rejected reserve response"
            );
        }
    }
}

#[async_trait]
impl<'a, I: InventoryService> Step<CheckoutRun> for ReserveInventory<'a, I> {
    fn name(&self) -> SagaStepName {
        SagaStepName::ReserveInventory
    }

    async fn execute(&self, run: &mut CheckoutRun) -> Result<(), StepError> {
        let ctx = run.ctx.child(self.timeout);
        let request = ReserveInventoryRequest::from_session(&run.session);
        let reservation_ids = within(
            &ctx,
            INVENTORY_SERVICE,
            self.inventory.reserve(&ctx, &request),
        )
        .await?;

        let expected = run.session.items.len();
        if reservation_ids.len() != expected {
            if !reservation_ids.is_empty() {
                self.release_unrecorded(&reservation_ids).await;
            }
            return Err(DownstreamError::InvalidResponse {
                service: INVENTORY_SERVICE,
                reason: format!(
                    "expected {expected} reservation ids, got {}",
                    reservation_ids.len()
                ),
            }
            .into());
        }

        let now = Utc::now();
        run.session.assign_reservations(reservation_ids, now)?;
        run.session.mark_items_reserved(now)?;
        Ok(())
    }

    async fn compensate(&self, run: &mut CheckoutRun) -> Result<(), StepError> {
        let reservation_ids = run.session.reservation_ids();
        if reservation_ids.is_empty() {
            return Ok(());
        }

        let ctx = CallContext::detached(self.timeout);
        within(
            &ctx,
            INVENTORY_SERVICE,
            self.inventory.release(&ctx, &reservation_ids),
        )
        .await?;
        run.session.clear_reservations(Utc::now());
        Ok(())
    }
}

/// Creates the order. Compensation cancels it.
pub struct CreateOrder<'a, O> {
    orders: &'a O,
    timeout: Option<Duration>,
}

impl<'a, O: OrderService> CreateOrder<'a, O> {
    pub fn new(orders: &'a O, timeout: Option<Duration>) -> Self {
        Self { orders, timeout }
    }
}

#[async_trait]
impl<'a, O: OrderService> Step<CheckoutRun> for CreateOrder<'a, O> {
    fn name(&self) -> SagaStepName {
        SagaStepName::CreateOrder
    }

    async fn execute(&self, run: &mut CheckoutRun) -> Result<(), StepError> {
        let ctx = run.ctx.child(self.timeout);
        let request = CreateOrderRequest::from_session(&run.session)?;
        let order_id = within(&ctx, ORDER_SERVICE, self.orders.create_order(&ctx, &request)).await?;
        run.session.record_order(order_id, Utc::now())?;
        Ok(())
    }

    async fn compensate(&self, run: &mut CheckoutRun) -> Result<(), StepError> {
        let Some(order_id) = run.session.order_id.clone() else {
            return Ok(());
        };

        let ctx = CallContext::detached(self.timeout);
        within(&ctx, ORDER_SERVICE, self.orders.cancel_order(&ctx, &order_id)).await?;
        Ok(())
    }
}

/// Starts the payment. Nothing to compensate: it is the last step.
pub struct InitiatePayment<'a, P> {
    payments: &'a P,
    timeout: Option<Duration>,
}

impl<'a, P: PaymentService> InitiatePayment<'a, P> {
    pub fn new(payments: &'a P, timeout: Option<Duration>) -> Self {
        Self { payments, timeout }
    }
}

#[async_trait]
impl<'a, P: PaymentService> Step<CheckoutRun> for InitiatePayment<'a, P> {
    fn name(&self) -> SagaStepName {
        SagaStepName::InitiatePayment
    }

    async fn execute(&self, run: &mut CheckoutRun) -> Result<(), StepError> {
        let ctx = run.ctx.child(self.timeout);
        let request = InitiatePaymentRequest::from_session(&run.session)?;
        let payment_id = within(
            &ctx,
            PAYMENT_SERVICE,
            self.payments.initiate_payment(&ctx, &request),
        )
        .await?;
        run.session.complete(payment_id, Utc::now())?;
        Ok(())
    }
}

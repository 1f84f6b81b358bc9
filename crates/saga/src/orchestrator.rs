//! Checkout orchestrator: session lifecycle plus the checkout saga.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CheckoutId;
use domain::{
    CheckoutDomainError, CheckoutSession, CheckoutStatus, Currency, NewCheckoutItem,
    PaymentMethod, SagaStepName, ShippingAddress, UserId,
};
use session_store::SessionStore;

use crate::config::SagaTimeouts;
use crate::context::CallContext;
use crate::engine::{Checkpoint, Saga, StepFailure};
use crate::error::{CheckoutError, Result};
use crate::events::{CheckoutEvent, EventPublisher, TracingEventPublisher, spawn_publish};
use crate::services::{InventoryService, OrderService, PaymentService};
use crate::steps::{CheckoutRun, CreateOrder, InitiatePayment, ReserveInventory};

/// Drives checkout sessions from creation to a terminal status.
///
/// Sessions are read, mutated and written back whole. Two concurrent
/// operations on one session both run to completion and the last write wins;
/// callers needing stronger guarantees must serialize per checkout id.
pub struct CheckoutOrchestrator<S, I, O, P> {
    store: S,
    inventory: I,
    orders: O,
    payments: P,
    publisher: Arc<dyn EventPublisher>,
    timeouts: SagaTimeouts,
}

impl<S, I, O, P> CheckoutOrchestrator<S, I, O, P>
where
    S: SessionStore,
    I: InventoryService,
    O: OrderService,
    P: PaymentService,
{
    /// Creates an orchestrator that logs events and inherits caller deadlines.
    pub fn new(store: S, inventory: I, orders: O, payments: P) -> Self {
        Self {
            store,
            inventory,
            orders,
            payments,
            publisher: Arc::new(TracingEventPublisher),
            timeouts: SagaTimeouts::default(),
        }
    }

    /// Replaces the event publisher.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Sets per-step deadlines.
    pub fn with_timeouts(mut self, timeouts: SagaTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Returns the session store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates the items and opens a new session.
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn initiate_checkout(
        &self,
        user_id: &str,
        items: Vec<NewCheckoutItem>,
        currency: &str,
    ) -> Result<CheckoutSession> {
        let user_id = UserId::new(user_id)?;
        let currency = Currency::new(currency)?;
        let session = CheckoutSession::initiate(user_id, items, currency, Utc::now())?;

        self.store.create(&session).await?;

        metrics::counter!("checkout_sessions_initiated_total").increment(1);
        tracing::info!(
            checkout_id = %session.id,
            total = %session.total_amount,
            expires_at = %session.expires_at,
            "checkout initiated"
        );
        Ok(session)
    }

    /// Returns the stored session as-is. Reading never expires a session.
    #[tracing::instrument(skip(self))]
    pub async fn get_checkout(&self, id: CheckoutId) -> Result<CheckoutSession> {
        self.store
            .get(id)
            .await?
            .ok_or(CheckoutError::NotFound(id))
    }

    /// Sets or replaces the shipping address.
    #[tracing::instrument(skip(self, address))]
    pub async fn set_shipping_address(
        &self,
        id: CheckoutId,
        address: ShippingAddress,
    ) -> Result<CheckoutSession> {
        let now = Utc::now();
        let mut session = self.load_open(id, now).await?;
        session.set_shipping_address(address, now)?;
        self.store.update(&session).await?;
        Ok(session)
    }

    /// Sets or replaces the payment method.
    #[tracing::instrument(skip(self))]
    pub async fn set_payment_method(
        &self,
        id: CheckoutId,
        payment_method: &str,
    ) -> Result<CheckoutSession> {
        let now = Utc::now();
        let mut session = self.load_open(id, now).await?;
        let payment_method = PaymentMethod::new(payment_method)?;
        session.set_payment_method(payment_method, now)?;
        self.store.update(&session).await?;
        Ok(session)
    }

    /// Runs the checkout saga with no caller deadline.
    pub async fn process_checkout(&self, id: CheckoutId) -> Result<CheckoutSession> {
        self.process_checkout_with(id, &CallContext::new()).await
    }

    /// Runs the checkout saga: reserve inventory, create order, initiate payment.
    ///
    /// On a step failure every completed step is compensated in reverse, the
    /// session is stored as `Failed` and the step error is returned. `ctx`
    /// bounds the forward steps; compensations run even if it is cancelled.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn process_checkout_with(
        &self,
        id: CheckoutId,
        ctx: &CallContext,
    ) -> Result<CheckoutSession> {
        let now = Utc::now();
        let mut session = self.load_open(id, now).await?;

        if session.status != CheckoutStatus::Initiated {
            return Err(CheckoutDomainError::InvalidStateTransition {
                current: session.status,
                action: "process checkout",
            }
            .into());
        }
        if session.shipping_address.is_none() {
            return Err(CheckoutDomainError::MissingField {
                field: "shipping_address",
            }
            .into());
        }
        if session.payment_method.is_none() {
            return Err(CheckoutDomainError::MissingField {
                field: "payment_method",
            }
            .into());
        }
        if let Some(drift) = session.reconcile_amounts(now)? {
            tracing::warn!(
                checkout_id = %id,
                stored = %drift.stored,
                recomputed = %drift.recomputed,
                "stored subtotal disagreed with line items, using recomputed amounts"
            );
        }

        metrics::counter!("checkout_saga_executions_total").increment(1);
        let started = std::time::Instant::now();

        let reserve = ReserveInventory::new(&self.inventory, self.timeouts.inventory);
        let create_order = CreateOrder::new(&self.orders, self.timeouts.order);
        let initiate_payment = InitiatePayment::new(&self.payments, self.timeouts.payment);
        let saga = Saga::<CheckoutRun>::new()
            .then(&reserve)
            .then(&create_order)
            .then(&initiate_payment);

        let mut run = CheckoutRun {
            session,
            ctx: ctx.clone(),
        };
        let checkpoint = SessionCheckpoint { store: &self.store };
        let report = saga.run(&mut run, &checkpoint).await;
        let mut session = run.session;

        metrics::histogram!("checkout_saga_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let trail = report.trail();
        match report.failure {
            None => {
                metrics::counter!("checkout_saga_completed_total").increment(1);
                tracing::info!(
                    checkout_id = %id,
                    order_id = session.order_id.as_deref().unwrap_or_default(),
                    payment_id = session.payment_id.as_deref().unwrap_or_default(),
                    "checkout completed"
                );
                spawn_publish(
                    Arc::clone(&self.publisher),
                    CheckoutEvent::completed(&session),
                );
                Ok(session)
            }
            Some(StepFailure { step, error }) => {
                metrics::counter!("checkout_saga_failed_total", "step" => step.as_str())
                    .increment(1);
                let reason = format!("{step}: {error}");
                tracing::warn!(
                    checkout_id = %id,
                    %step,
                    service = error.service().unwrap_or_default(),
                    %trail,
                    reason = %reason,
                    "checkout failed"
                );

                session.fail(reason, Utc::now())?;
                if let Err(store_error) = self.store.update(&session).await {
                    tracing::error!(
                        checkout_id = %id,
                        error = %store_error,
                        "failed to persist failed checkout"
                    );
                }
                spawn_publish(Arc::clone(&self.publisher), CheckoutEvent::failed(&session));
                Err(CheckoutError::StepFailed {
                    step,
                    source: error,
                })
            }
        }
    }

    /// Cancels a non-terminal session. Downstream state is not touched.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_checkout(&self, id: CheckoutId) -> Result<CheckoutSession> {
        let now = Utc::now();
        let mut session = self.load_open(id, now).await?;
        session.cancel(now)?;
        self.store.update(&session).await?;

        metrics::counter!("checkout_sessions_cancelled_total").increment(1);
        tracing::info!(checkout_id = %id, "checkout cancelled");
        spawn_publish(Arc::clone(&self.publisher), CheckoutEvent::failed(&session));
        Ok(session)
    }

    /// Loads a session that may still be mutated.
    ///
    /// A session past its TTL is stored as `Expired` once, then every later
    /// call reports it as expired without writing.
    async fn load_open(&self, id: CheckoutId, now: DateTime<Utc>) -> Result<CheckoutSession> {
        let mut session = self
            .store
            .get(id)
            .await?
            .ok_or(CheckoutError::NotFound(id))?;

        match session.status {
            CheckoutStatus::Expired => return Err(CheckoutError::Expired(id)),
            status if status.is_terminal() => {
                return Err(CheckoutError::Terminal { id, status });
            }
            _ => {}
        }

        if session.is_expired(now) {
            session.expire(now)?;
            self.store.update(&session).await?;
            metrics::counter!("checkout_sessions_expired_total").increment(1);
            tracing::info!(checkout_id = %id, expires_at = %session.expires_at, "checkout expired");
            return Err(CheckoutError::Expired(id));
        }

        Ok(session)
    }
}

/// Writes the session after every successful step.
struct SessionCheckpoint<'a, S> {
    store: &'a S,
}

#[async_trait]
impl<'a, S: SessionStore> Checkpoint<CheckoutRun> for SessionCheckpoint<'a, S> {
    async fn save(&self, step: SagaStepName, run: &CheckoutRun) {
        if let Err(error) = self.store.update(&run.session).await {
            tracing::error!(
                checkout_id = %run.session.id,
                step = %step,
                error = %error,
                "failed to persist checkout after successful step"
            );
        }
    }
}

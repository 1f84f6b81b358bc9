//! Checkout outcome events and their publishers.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CheckoutId;
use domain::{CheckoutSession, CheckoutStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::lock;

/// Kind of outcome being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutEventType {
    #[serde(rename = "checkout.completed")]
    Completed,
    #[serde(rename = "checkout.failed")]
    Failed,
}

impl CheckoutEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "checkout.completed",
            Self::Failed => "checkout.failed",
        }
    }
}

impl std::fmt::Display for CheckoutEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session at the moment it reached a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutEvent {
    pub event_type: CheckoutEventType,
    pub checkout_id: CheckoutId,
    pub user_id: String,
    pub status: CheckoutStatus,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CheckoutEvent {
    pub fn completed(session: &CheckoutSession) -> Self {
        Self::from_session(CheckoutEventType::Completed, session)
    }

    pub fn failed(session: &CheckoutSession) -> Self {
        Self::from_session(CheckoutEventType::Failed, session)
    }

    fn from_session(event_type: CheckoutEventType, session: &CheckoutSession) -> Self {
        Self {
            event_type,
            checkout_id: session.id,
            user_id: session.user_id.as_str().to_string(),
            status: session.status,
            order_id: session.order_id.clone(),
            payment_id: session.payment_id.clone(),
            total_amount: session.total_amount.minor_units(),
            currency: session.currency.as_str().to_string(),
            reason: session.failure_reason.clone(),
            occurred_at: session.updated_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event publisher unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for checkout events.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, event: &CheckoutEvent) -> Result<(), PublishError>;
}

/// Publishes in the background. Failures are logged, never returned.
pub(crate) fn spawn_publish(publisher: Arc<dyn EventPublisher>, event: CheckoutEvent) {
    tokio::spawn(async move {
        if let Err(error) = publisher.publish(&event).await {
            tracing::warn!(
                checkout_id = %event.checkout_id,
                event_type = %event.event_type,
                error = %error,
                "failed to publish checkout event"
            );
        }
    });
}

/// Emits each event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: &CheckoutEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(
            target: "checkout_events",
            event_type = %event.event_type,
            checkout_id = %event.checkout_id,
            payload = %payload,
            "checkout event"
        );
        Ok(())
    }
}

/// Collects events in memory for assertions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<CheckoutEvent>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail without recording the event.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<CheckoutEvent> {
        lock(&self.events).clone()
    }

    /// Waits until at least `count` events arrived; false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.events).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &CheckoutEvent) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("publisher disabled".into()));
        }
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

//! Saga tuning.

use std::time::Duration;

/// Per-step deadlines. `None` means the step inherits the caller's bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SagaTimeouts {
    pub inventory: Option<Duration>,
    pub order: Option<Duration>,
    pub payment: Option<Duration>,
}

impl SagaTimeouts {
    /// Builds timeouts from millisecond settings where `0` means inherit.
    pub fn from_millis(inventory: u64, order: u64, payment: u64) -> Self {
        Self {
            inventory: non_zero_millis(inventory),
            order: non_zero_millis(order),
            payment: non_zero_millis(payment),
        }
    }
}

fn non_zero_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

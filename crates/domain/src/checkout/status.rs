//! Checkout session state machine.

use serde::{Deserialize, Serialize};

/// The status of a checkout session in its lifecycle.
///
/// State transitions:
/// ```text
/// Initiated ──► ItemsReserved ──► PaymentProcessing ──► Completed
///     │               │                   │
///     └───────────────┴───────────────────┴──► Failed | Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    /// Session created; shipping address and payment method may be set.
    #[default]
    Initiated,

    /// Inventory is held for every line item.
    ItemsReserved,

    /// Order record exists, payment is being initiated.
    PaymentProcessing,

    /// Payment initiated (terminal state).
    Completed,

    /// Saga aborted or cancelled by the shopper (terminal state).
    Failed,

    /// TTL elapsed before completion (terminal state).
    Expired,
}

impl CheckoutStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutStatus::Completed | CheckoutStatus::Failed | CheckoutStatus::Expired
        )
    }

    /// Returns true if the shipping address and payment method can still change.
    pub fn can_edit_details(&self) -> bool {
        matches!(self, CheckoutStatus::Initiated)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: CheckoutStatus) -> bool {
        use CheckoutStatus::*;

        match (self, next) {
            (Initiated, ItemsReserved)
            | (ItemsReserved, PaymentProcessing)
            | (PaymentProcessing, Completed) => true,
            (from, Failed | Expired) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Initiated => "initiated",
            CheckoutStatus::ItemsReserved => "items_reserved",
            CheckoutStatus::PaymentProcessing => "payment_processing",
            CheckoutStatus::Completed => "completed",
            CheckoutStatus::Failed => "failed",
            CheckoutStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CheckoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(CheckoutStatus::Initiated),
            "items_reserved" => Ok(CheckoutStatus::ItemsReserved),
            "payment_processing" => Ok(CheckoutStatus::PaymentProcessing),
            "completed" => Ok(CheckoutStatus::Completed),
            "failed" => Ok(CheckoutStatus::Failed),
            "expired" => Ok(CheckoutStatus::Expired),
            other => Err(format!("unknown checkout status: {other}")),
        }
    }
}

//! Domain error types.

use thiserror::Error;

use crate::checkout::CheckoutStatus;

/// Errors raised by checkout session validation and state transitions.
///
/// None of these ever involve a downstream call; callers treat every
/// variant as invalid input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckoutDomainError {
    /// A required field was missing or blank.
    #[error("{field} is required")]
    MissingField { field: &'static str },

    /// Checkout was started without any items.
    #[error("checkout requires at least one item")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {sku}: {quantity} (must be greater than 0)")]
    InvalidQuantity { sku: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {sku}: {price} (must be greater than 0)")]
    InvalidPrice { sku: String, price: i64 },

    /// Currency code is not a three-letter ISO-4217 code.
    #[error("Invalid currency code: {code:?}")]
    InvalidCurrency { code: String },

    /// Amounts do not fit in the minor-unit range.
    #[error("checkout amount overflow")]
    AmountOverflow,

    /// Session is not in a state that allows the requested action.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: CheckoutStatus,
        action: &'static str,
    },

    /// The inventory service returned a different number of reservations than items.
    #[error("expected {expected} reservation ids, got {actual}")]
    ReservationMismatch { expected: usize, actual: usize },
}

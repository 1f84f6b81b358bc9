//! Domain layer for the checkout orchestrator.
//!
//! This crate holds the pure, synchronous part of checkout:
//! - `CheckoutSession` with its amount invariant and TTL
//! - `CheckoutStatus` state machine
//! - line items, value objects and per-run saga step records
//!
//! Every time-dependent operation takes `now` explicitly.

pub mod checkout;
pub mod error;

pub use checkout::{
    AmountDrift, CANCELLED_BY_USER, CHECKOUT_TTL_MINUTES, CheckoutItem, CheckoutSession,
    CheckoutStatus, Currency, Money, NewCheckoutItem, PaymentMethod, ProductId, SagaStep,
    SagaStepName, SagaStepStatus, ShippingAddress, UserId, VariantId, checkout_ttl,
};
pub use error::CheckoutDomainError;

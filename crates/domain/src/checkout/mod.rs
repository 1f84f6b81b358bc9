//! Checkout session, line items and the session state machine.

mod item;
mod saga_step;
mod session;
mod status;
mod value_objects;

pub use item::{CheckoutItem, NewCheckoutItem};
pub use saga_step::{SagaStep, SagaStepName, SagaStepStatus};
pub use session::{
    AmountDrift, CANCELLED_BY_USER, CHECKOUT_TTL_MINUTES, CheckoutSession, checkout_ttl,
};
pub use status::CheckoutStatus;
pub use value_objects::{
    Currency, Money, PaymentMethod, ProductId, ShippingAddress, UserId, VariantId,
};

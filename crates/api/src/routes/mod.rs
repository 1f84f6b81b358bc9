//! HTTP route handlers.

pub mod checkouts;
pub mod health;
pub mod metrics;

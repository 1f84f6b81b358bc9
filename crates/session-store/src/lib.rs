//! Checkout session persistence.
//!
//! The orchestrator only needs create/get/update; this crate provides the
//! `SessionStore` trait with an in-memory implementation for tests and a
//! PostgreSQL implementation for deployment.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
pub use store::SessionStore;

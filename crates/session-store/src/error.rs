use common::CheckoutId;
use thiserror::Error;

/// Errors that can occur when reading or writing checkout sessions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A session with this id was already created.
    #[error("Checkout session already exists: {0}")]
    AlreadyExists(CheckoutId),

    /// An update targeted a session that was never created.
    #[error("Checkout session not found: {0}")]
    NotFound(CheckoutId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store refused the operation.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

use std::sync::Arc;

use async_trait::async_trait;
use common::CheckoutId;
use domain::CheckoutSession;

use crate::Result;

/// Persistence collaborator for checkout sessions.
///
/// Writes are unconditional: there is no compare-and-swap, so two writers
/// racing on the same session resolve as last writer wins.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, session: &CheckoutSession) -> Result<()>;

    /// Loads a session by id.
    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutSession>>;

    /// Overwrites a stored session. Fails with `NotFound` if it was never created.
    async fn update(&self, session: &CheckoutSession) -> Result<()>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn create(&self, session: &CheckoutSession) -> Result<()> {
        (**self).create(session).await
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutSession>> {
        (**self).get(id).await
    }

    async fn update(&self, session: &CheckoutSession) -> Result<()> {
        (**self).update(session).await
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::CheckoutId;
use domain::CheckoutSession;
use tokio::sync::RwLock;

use crate::{Result, SessionStore, StoreError};

#[derive(Debug, Default)]
struct Entry {
    session: Option<CheckoutSession>,
    updates: usize,
}

/// In-memory session store for tests and local runs.
///
/// Provides the same interface as the PostgreSQL implementation plus a few
/// hooks for planting state and injecting failures.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<CheckoutId, Entry>>>,
    fail_on_update: Arc<AtomicBool>,
}

impl InMemorySessionStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session as-is, replacing any existing copy without counting
    /// it as an update.
    pub async fn insert_raw(&self, session: CheckoutSession) {
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        sessions.entry(id).or_default().session = Some(session);
    }

    /// Returns how many times `update` succeeded for the given session.
    pub async fn update_count(&self, id: CheckoutId) -> usize {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.updates)
            .unwrap_or(0)
    }

    /// Returns the number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| entry.session.is_some())
            .count()
    }

    /// Makes every subsequent `update` fail until reset.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.fail_on_update.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &CheckoutSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(session.id).or_default();
        if entry.session.is_some() {
            return Err(StoreError::AlreadyExists(session.id));
        }
        entry.session = Some(session.clone());
        Ok(())
    }

    async fn get(&self, id: CheckoutId) -> Result<Option<CheckoutSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).and_then(|entry| entry.session.clone()))
    }

    async fn update(&self, session: &CheckoutSession) -> Result<()> {
        if self.fail_on_update.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("update rejected".to_string()));
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(entry) if entry.session.is_some() => {
                entry.session = Some(session.clone());
                entry.updates += 1;
                Ok(())
            }
            _ => Err(StoreError::NotFound(session.id)),
        }
    }
}

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a checkout session.
///
/// Wraps a UUID so checkout ids cannot be confused with order, payment
/// or reservation identifiers handed back by downstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutId(Uuid);

impl CheckoutId {
    /// Creates a new random checkout ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a checkout ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CheckoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CheckoutId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CheckoutId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for CheckoutId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CheckoutId> for Uuid {
    fn from(id: CheckoutId) -> Self {
        id.0
    }
}

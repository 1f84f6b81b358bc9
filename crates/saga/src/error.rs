//! Orchestrator error types.

use std::time::Duration;

use common::CheckoutId;
use domain::{CheckoutDomainError, CheckoutStatus, SagaStepName};
use session_store::StoreError;
use thiserror::Error;

use crate::engine::StepError;

/// Coarse classification used by hosts to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Gone,
    ServiceUnavailable,
    Downstream,
    Internal,
}

/// Errors returned by [`CheckoutOrchestrator`](crate::CheckoutOrchestrator).
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Validation or illegal state transition.
    #[error(transparent)]
    Domain(#[from] CheckoutDomainError),

    /// Session does not exist.
    #[error("Checkout session not found: {0}")]
    NotFound(CheckoutId),

    /// Session passed its TTL.
    #[error("Checkout session {0} has expired")]
    Expired(CheckoutId),

    /// Session already reached a terminal status.
    #[error("Checkout session {id} is already {status}")]
    Terminal { id: CheckoutId, status: CheckoutStatus },

    /// A saga step failed; completed steps were compensated.
    #[error("{step}: {source}")]
    StepFailed {
        step: SagaStepName,
        #[source]
        source: StepError,
    },

    /// Session store failure.
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(_) | Self::Terminal { .. } => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Expired(_) => ErrorKind::Gone,
            Self::StepFailed { source, .. } if source.is_circuit_open() => {
                ErrorKind::ServiceUnavailable
            }
            Self::StepFailed {
                source: StepError::Downstream(_),
                ..
            } => ErrorKind::Downstream,
            Self::StepFailed {
                source: StepError::Domain(_),
                ..
            } => ErrorKind::Internal,
            Self::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Returns true when a circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::StepFailed { source, .. } if source.is_circuit_open())
    }

    /// Breaker hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::StepFailed { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

//! Deadline and cancellation carried through a saga run.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a call was cut short by its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled by caller")]
    Cancelled,
}

/// Bounds for a downstream call: an optional deadline plus a cancellation
/// token owned by the caller.
///
/// A context without a deadline is bounded only by cancellation.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// Creates an unbounded context.
    pub fn new() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child(Some(timeout))
    }

    /// Creates an unbounded context cancelled through `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel: token,
        }
    }

    /// Derives a context for one step.
    ///
    /// `None` inherits the parent's bounds unchanged; otherwise the earlier of
    /// the parent deadline and `now + timeout` wins. Cancelling the parent
    /// cancels the child.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (parent, None) => parent,
            (None, Some(timeout)) => Some(Instant::now() + timeout),
            (Some(parent), Some(timeout)) => Some(parent.min(Instant::now() + timeout)),
        };
        Self {
            deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// A fresh context unrelated to any caller, used for compensations.
    pub fn detached(timeout: Option<Duration>) -> Self {
        Self::new().child(timeout)
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true once the caller has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drives `fut` until it finishes, the deadline passes or the context is
    /// cancelled, whichever comes first. The future is dropped on the latter two.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(ContextError::Cancelled),
                result = tokio::time::timeout_at(deadline, fut) => {
                    result.map_err(|_| ContextError::DeadlineExceeded)
                }
            },
            None => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(ContextError::Cancelled),
                output = fut => Ok(output),
            },
        }
    }
}

//! Sequential saga runner.
//!
//! Steps run in order against shared state. When one fails, every step that
//! already completed is compensated in reverse order. A compensation failure
//! is logged and does not stop the remaining compensations.

use async_trait::async_trait;
use chrono::Utc;
use domain::{CheckoutDomainError, SagaStep, SagaStepName};
use thiserror::Error;

use crate::services::DownstreamError;

/// Why a step or compensation failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error(transparent)]
    Domain(#[from] CheckoutDomainError),
}

impl StepError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Downstream(err) if err.is_circuit_open())
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::Downstream(err) => err.retry_after(),
            Self::Domain(_) => None,
        }
    }

    /// The downstream service that produced the error, if any.
    pub fn service(&self) -> Option<&'static str> {
        match self {
            Self::Downstream(err) => Some(err.service()),
            Self::Domain(_) => None,
        }
    }
}

/// A forward action with an optional compensating action.
#[async_trait]
pub trait Step<S: Send>: Send + Sync {
    fn name(&self) -> SagaStepName;

    async fn execute(&self, state: &mut S) -> Result<(), StepError>;

    /// Undoes a completed `execute`. Steps with nothing to undo keep the default.
    async fn compensate(&self, _state: &mut S) -> Result<(), StepError> {
        Ok(())
    }
}

/// Persists state after each successful step.
#[async_trait]
pub trait Checkpoint<S: Sync>: Send + Sync {
    async fn save(&self, step: SagaStepName, state: &S);
}

/// Checkpoint that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

#[async_trait]
impl<S: Sync> Checkpoint<S> for NoCheckpoint {
    async fn save(&self, _step: SagaStepName, _state: &S) {}
}

/// The step that stopped the saga.
#[derive(Debug)]
pub struct StepFailure {
    pub step: SagaStepName,
    pub error: StepError,
}

/// Outcome of one saga run.
#[derive(Debug)]
pub struct SagaReport {
    /// Per-step records, in execution order.
    pub steps: Vec<SagaStep>,
    pub failure: Option<StepFailure>,
}

impl SagaReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Names of the steps whose compensation succeeded.
    pub fn compensated(&self) -> Vec<SagaStepName> {
        self.steps
            .iter()
            .filter(|step| step.status == domain::SagaStepStatus::Compensated)
            .map(|step| step.name)
            .collect()
    }

    /// One-line summary of every step outcome, e.g.
    /// `reserve inventory=compensated, create order=failed`.
    pub fn trail(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("{}={}", step.name, step.status))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// An ordered list of steps over state `S`.
pub struct Saga<'a, S> {
    steps: Vec<&'a (dyn Step<S> + 'a)>,
}

impl<S: Send + Sync> Default for Saga<'_, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, S: Send + Sync> Saga<'a, S> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step.
    pub fn then(mut self, step: &'a (dyn Step<S> + 'a)) -> Self {
        self.steps.push(step);
        self
    }

    /// Runs every step, compensating on the first failure.
    pub async fn run(&self, state: &mut S, checkpoint: &dyn Checkpoint<S>) -> SagaReport {
        let mut records = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let name = step.name();
            let mut record = SagaStep::pending(name, Utc::now());
            tracing::info!(step = %name, "saga step started");

            match step.execute(state).await {
                Ok(()) => {
                    record.complete(Utc::now());
                    records.push(record);
                    tracing::info!(step = %name, "saga step completed");
                    checkpoint.save(name, state).await;
                }
                Err(error) => {
                    tracing::warn!(step = %name, error = %error, "saga step failed");
                    metrics::counter!("checkout_saga_step_failures_total", "step" => name.as_str())
                        .increment(1);
                    record.fail(error.to_string(), Utc::now());
                    records.push(record);

                    self.compensate(index, state, &mut records).await;
                    return SagaReport {
                        steps: records,
                        failure: Some(StepFailure { step: name, error }),
                    };
                }
            }
        }

        SagaReport {
            steps: records,
            failure: None,
        }
    }

    /// Compensates the first `completed` steps, newest first.
    async fn compensate(&self, completed: usize, state: &mut S, records: &mut [SagaStep]) {
        for index in (0..completed).rev() {
            let step = self.steps[index];
            let name = step.name();
            tracing::info!(step = %name, "compensating saga step");

            match step.compensate(state).await {
                Ok(()) => {
                    records[index].compensated(Utc::now());
                    metrics::counter!("checkout_compensations_total", "step" => name.as_str())
                        .increment(1);
                }
                Err(error) => {
                    tracing::error!(step = %name, error = %error, "compensation failed");
                    metrics::counter!("checkout_compensation_failures_total", "step" => name.as_str())
                        .increment(1);
                }
            }
        }
    }
}

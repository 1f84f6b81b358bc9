//! Per-run saga step records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three forward steps of the checkout saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepName {
    ReserveInventory,
    CreateOrder,
    InitiatePayment,
}

impl SagaStepName {
    /// Human-readable step name; this is what callers see in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStepName::ReserveInventory => "reserve inventory",
            SagaStepName::CreateOrder => "create order",
            SagaStepName::InitiatePayment => "initiate payment",
        }
    }
}

impl std::fmt::Display for SagaStepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single step within one saga run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepStatus {
    Pending,
    Completed,
    Failed,
    Compensated,
}

impl SagaStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStepStatus::Pending => "pending",
            SagaStepStatus::Completed => "completed",
            SagaStepStatus::Failed => "failed",
            SagaStepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for SagaStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a saga step. Transient: kept for the duration of one run
/// and reported through logs, never stored with the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStep {
    pub name: SagaStepName,
    pub status: SagaStepStatus,
    pub executed_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl SagaStep {
    /// Creates a pending record for a step about to run.
    pub fn pending(name: SagaStepName, now: DateTime<Utc>) -> Self {
        Self {
            name,
            status: SagaStepStatus::Pending,
            executed_at: now,
            error: None,
        }
    }

    /// Marks the step as completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = SagaStepStatus::Completed;
        self.executed_at = now;
    }

    /// Marks the step as failed with the given error message.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = SagaStepStatus::Failed;
        self.executed_at = now;
        self.error = Some(error.into());
    }

    /// Marks a previously completed step as compensated.
    pub fn compensated(&mut self, now: DateTime<Utc>) {
        self.status = SagaStepStatus::Compensated;
        self.executed_at = now;
    }
}

//! Prometheus exposition for the checkout host.
//!
//! The saga engine, orchestrator and circuit breakers record through the
//! `metrics` facade; this module installs the recorder that backs it and
//! serves the rendered snapshot.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const SAGA_DURATION: &str = "checkout_saga_duration_seconds";

/// Saga runs span three downstream calls, each bounded by a step timeout.
const SAGA_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Builder with the histogram buckets used for saga timings.
pub fn recorder_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(SAGA_DURATION.to_string()), SAGA_DURATION_BUCKETS)
}

/// Installs the global recorder and registers descriptions for every
/// checkout metric.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = recorder_builder()?.install_recorder()?;
    describe();
    Ok(handle)
}

/// Registers help text with whichever recorder is current.
pub fn describe() {
    describe_counter!("checkout_sessions_initiated_total", "Checkout sessions created");
    describe_counter!("checkout_sessions_cancelled_total", "Checkout sessions cancelled by the buyer");
    describe_counter!("checkout_sessions_expired_total", "Checkout sessions found past their TTL");
    describe_counter!("checkout_saga_executions_total", "Checkout sagas started");
    describe_counter!("checkout_saga_completed_total", "Checkout sagas that placed an order");
    describe_counter!("checkout_saga_failed_total", "Checkout sagas that ended in failure");
    describe_counter!("checkout_saga_step_failures_total", "Saga step failures by step");
    describe_counter!("checkout_compensations_total", "Completed steps rolled back by step");
    describe_counter!("checkout_compensation_failures_total", "Compensations that failed by step");
    describe_histogram!(SAGA_DURATION, Unit::Seconds, "Wall time of one checkout saga run");
    describe_gauge!("circuit_breaker_state", "Breaker state per downstream: 0 closed, 1 half-open, 2 open");
    describe_counter!("circuit_breaker_rejections_total", "Calls refused by an open breaker");
}

/// GET /metrics
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

//! Per-destination circuit breaker and the transport decorator that applies it.
//!
//! The breaker counts calls in a rolling window while closed and trips once
//! `requests >= min_requests` and the failure ratio reaches `failure_ratio`.
//! After `open_timeout` it lets `max_half_open_requests` probes through; that
//! many consecutive successes close it again, any failure re-opens it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use super::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::context::CallContext;

/// Time source for the breaker.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        self.start + elapsed
    }
}

/// Rejected breaker settings.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid circuit breaker settings: {0}")]
pub struct BreakerSettingsError(String);

/// Breaker tuning. One breaker is built per downstream destination.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    /// Destination name, used in logs, metrics and errors.
    pub name: String,
    /// Probes allowed while half-open; also the successes needed to close.
    pub max_half_open_requests: u32,
    /// Closed-state counting window. `None` keeps counts until a state change.
    pub interval: Option<Duration>,
    /// How long the breaker stays open before probing.
    pub open_timeout: Duration,
    /// Failure share, in `(0, 1]`, at which a closed breaker trips.
    pub failure_ratio: f64,
    /// Calls required in the window before the ratio is considered.
    pub min_requests: u32,
}

impl BreakerSettings {
    /// Default settings for a named destination.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BreakerSettingsError> {
        if self.max_half_open_requests == 0 {
            return Err(BreakerSettingsError(
                "max_half_open_requests must be greater than 0".into(),
            ));
        }
        if self.min_requests == 0 {
            return Err(BreakerSettingsError(
                "min_requests must be greater than 0".into(),
            ));
        }
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(BreakerSettingsError(format!(
                "failure_ratio must be in (0, 1], got {}",
                self.failure_ratio
            )));
        }
        if self.open_timeout.is_zero() {
            return Err(BreakerSettingsError(
                "open_timeout must be greater than 0".into(),
            ));
        }
        if self.interval.is_some_and(|interval| interval.is_zero()) {
            return Err(BreakerSettingsError(
                "interval must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "downstream".into(),
            max_half_open_requests: 3,
            interval: Some(Duration::from_secs(10)),
            open_timeout: Duration::from_secs(30),
            failure_ratio: 0.6,
            min_requests: 3,
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    /// Gauge value: 0 closed, 1 half-open, 2 open.
    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    requests: u32,
    successes: u32,
    failures: u32,
    consecutive_successes: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.successes += 1;
        self.consecutive_successes += 1;
    }

    fn on_failure(&mut self) {
        self.failures += 1;
        self.consecutive_successes = 0;
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// Admission ticket returned by [`CircuitBreaker::allow`].
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    generation: u64,
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    settings: BreakerSettings,
    state: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(settings: BreakerSettings) -> Result<Self, BreakerSettingsError> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(settings: BreakerSettings, clock: C) -> Result<Self, BreakerSettingsError> {
        settings.validate()?;
        let now = clock.now();
        let breaker = Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: settings.interval.map(|interval| now + interval),
            }),
            settings,
            clock,
        };
        breaker.publish_state(CircuitState::Closed);
        Ok(breaker)
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, applying any pending time-based transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, self.clock.now());
        inner.state
    }

    /// Admits a call or fails fast with [`TransportError::CircuitOpen`].
    pub fn allow(&self) -> Result<Permit, TransportError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        let rejected = match inner.state {
            CircuitState::Open => true,
            CircuitState::HalfOpen => {
                inner.counts.requests >= self.settings.max_half_open_requests
            }
            CircuitState::Closed => false,
        };
        if rejected {
            let retry_after = inner
                .expiry
                .map(|expiry| expiry.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);
            metrics::counter!("circuit_breaker_rejections_total", "name" => self.settings.name.clone())
                .increment(1);
            return Err(TransportError::CircuitOpen {
                name: self.settings.name.clone(),
                retry_after,
            });
        }

        inner.counts.requests += 1;
        Ok(Permit {
            generation: inner.generation,
        })
    }

    /// Records the outcome of an admitted call. Outcomes from an earlier
    /// generation are ignored.
    pub fn record(&self, permit: Permit, success: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        if inner.generation != permit.generation {
            return;
        }

        if success {
            inner.counts.on_success();
            if inner.state == CircuitState::HalfOpen
                && inner.counts.consecutive_successes >= self.settings.max_half_open_requests
            {
                self.transition(&mut inner, CircuitState::Closed, now);
            }
            return;
        }

        inner.counts.on_failure();
        match inner.state {
            CircuitState::Closed if self.should_trip(&inner.counts) => {
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open, now),
            _ => {}
        }
    }

    fn should_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.settings.min_requests
            && f64::from(counts.failures) / f64::from(counts.requests)
                >= self.settings.failure_ratio
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);
        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => self.transition(inner, CircuitState::HalfOpen, now),
            _ => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);

        tracing::warn!(breaker = %self.settings.name, %from, %to, "circuit breaker state changed");
        self.publish_state(to);
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => self.settings.interval.map(|interval| now + interval),
            CircuitState::Open => Some(now + self.settings.open_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn publish_state(&self, state: CircuitState) {
        metrics::gauge!("circuit_breaker_state", "name" => self.settings.name.clone())
            .set(state.gauge_value());
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records a failure if the guarded call is dropped before reporting, which is
/// what happens when a deadline or cancellation abandons it.
struct OutcomeGuard<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    permit: Option<Permit>,
}

impl<C: Clock> OutcomeGuard<'_, C> {
    fn finish(mut self, success: bool) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, success);
        }
    }
}

impl<C: Clock> Drop for OutcomeGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, false);
        }
    }
}

/// Wraps a transport with a breaker.
///
/// Transport errors and 5xx responses count as failures. 4xx responses are
/// business outcomes and count as successes.
#[derive(Debug)]
pub struct CircuitBreakerTransport<T, C: Clock = SystemClock> {
    inner: T,
    breaker: CircuitBreaker<C>,
}

impl<T: HttpTransport> CircuitBreakerTransport<T, SystemClock> {
    pub fn new(inner: T, settings: BreakerSettings) -> Result<Self, BreakerSettingsError> {
        Ok(Self {
            inner,
            breaker: CircuitBreaker::new(settings)?,
        })
    }
}

impl<T: HttpTransport, C: Clock> CircuitBreakerTransport<T, C> {
    pub fn with_breaker(inner: T, breaker: CircuitBreaker<C>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }
}

#[async_trait]
impl<T: HttpTransport, C: Clock> HttpTransport for CircuitBreakerTransport<T, C> {
    async fn execute(
        &self,
        ctx: &CallContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let guard = OutcomeGuard {
            breaker: &self.breaker,
            permit: Some(self.breaker.allow()?),
        };

        let result = self.inner.execute(ctx, request).await;
        let success = matches!(&result, Ok(response) if !response.is_server_error());
        guard.finish(success);
        result
    }
}

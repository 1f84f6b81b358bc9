//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{BreakerSettings, SagaTimeouts};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`, `RUST_LOG`: bind address, listen port, tracing filter
/// - `DATABASE_URL`: PostgreSQL session store; unset keeps sessions in memory
/// - `INVENTORY_SERVICE_URL`, `ORDER_SERVICE_URL`, `PAYMENT_SERVICE_URL`:
///   downstream base URLs; an unset URL is served by an in-memory stand-in
/// - `SAGA_INVENTORY_TIMEOUT_MS`, `SAGA_ORDER_TIMEOUT_MS`,
///   `SAGA_PAYMENT_TIMEOUT_MS`: per-step deadlines, `0` inherits the caller's
/// - `DOWNSTREAM_TIMEOUT_MS`, `DOWNSTREAM_MAX_ATTEMPTS`: HTTP client bounds
/// - `CIRCUIT_BREAKER_MAX_REQUESTS`, `CIRCUIT_BREAKER_INTERVAL_MS` (`0` never
///   resets counts), `CIRCUIT_BREAKER_TIMEOUT_MS`,
///   `CIRCUIT_BREAKER_FAILURE_RATIO`, `CIRCUIT_BREAKER_MIN_REQUESTS`
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub inventory_url: Option<String>,
    pub order_url: Option<String>,
    pub payment_url: Option<String>,
    pub inventory_timeout_ms: u64,
    pub order_timeout_ms: u64,
    pub payment_timeout_ms: u64,
    pub downstream_timeout_ms: u64,
    pub downstream_max_attempts: usize,
    pub breaker_max_requests: u32,
    pub breaker_interval_ms: u64,
    pub breaker_timeout_ms: u64,
    pub breaker_failure_ratio: f64,
    pub breaker_min_requests: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: env_opt("DATABASE_URL"),
            inventory_url: env_opt("INVENTORY_SERVICE_URL"),
            order_url: env_opt("ORDER_SERVICE_URL"),
            payment_url: env_opt("PAYMENT_SERVICE_URL"),
            inventory_timeout_ms: env_or("SAGA_INVENTORY_TIMEOUT_MS", defaults.inventory_timeout_ms),
            order_timeout_ms: env_or("SAGA_ORDER_TIMEOUT_MS", defaults.order_timeout_ms),
            payment_timeout_ms: env_or("SAGA_PAYMENT_TIMEOUT_MS", defaults.payment_timeout_ms),
            downstream_timeout_ms: env_or("DOWNSTREAM_TIMEOUT_MS", defaults.downstream_timeout_ms),
            downstream_max_attempts: env_or(
                "DOWNSTREAM_MAX_ATTEMPTS",
                defaults.downstream_max_attempts,
            ),
            breaker_max_requests: env_or(
                "CIRCUIT_BREAKER_MAX_REQUESTS",
                defaults.breaker_max_requests,
            ),
            breaker_interval_ms: env_or("CIRCUIT_BREAKER_INTERVAL_MS", defaults.breaker_interval_ms),
            breaker_timeout_ms: env_or("CIRCUIT_BREAKER_TIMEOUT_MS", defaults.breaker_timeout_ms),
            breaker_failure_ratio: env_or(
                "CIRCUIT_BREAKER_FAILURE_RATIO",
                defaults.breaker_failure_ratio,
            ),
            breaker_min_requests: env_or(
                "CIRCUIT_BREAKER_MIN_REQUESTS",
                defaults.breaker_min_requests,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-step saga deadlines.
    pub fn saga_timeouts(&self) -> SagaTimeouts {
        SagaTimeouts::from_millis(
            self.inventory_timeout_ms,
            self.order_timeout_ms,
            self.payment_timeout_ms,
        )
    }

    /// Upper bound for a single downstream HTTP request.
    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }

    /// Breaker settings for one downstream destination.
    pub fn breaker_settings(&self, name: &str) -> BreakerSettings {
        BreakerSettings {
            name: name.to_string(),
            max_half_open_requests: self.breaker_max_requests,
            interval: (self.breaker_interval_ms > 0)
                .then(|| Duration::from_millis(self.breaker_interval_ms)),
            open_timeout: Duration::from_millis(self.breaker_timeout_ms),
            failure_ratio: self.breaker_failure_ratio,
            min_requests: self.breaker_min_requests,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            inventory_url: None,
            order_url: None,
            payment_url: None,
            inventory_timeout_ms: 5_000,
            order_timeout_ms: 5_000,
            payment_timeout_ms: 10_000,
            downstream_timeout_ms: 15_000,
            downstream_max_attempts: 1,
            breaker_max_requests: 3,
            breaker_interval_ms: 10_000,
            breaker_timeout_ms: 30_000,
            breaker_failure_ratio: 0.6,
            breaker_min_requests: 3,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

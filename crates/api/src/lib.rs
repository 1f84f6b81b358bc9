//! HTTP host for the checkout saga orchestrator.
//!
//! Exposes the six checkout operations over REST, with structured logging
//! (tracing) and Prometheus metrics. Downstream services without a configured
//! URL and a missing `DATABASE_URL` fall back to in-memory stand-ins so the
//! server runs standalone.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::{INVENTORY_SERVICE, ORDER_SERVICE, PAYMENT_SERVICE};
use saga::{
    CheckoutOrchestrator, CircuitBreakerTransport, HttpInventoryService, HttpOrderService,
    HttpPaymentService, InMemoryInventoryService, InMemoryOrderService, InMemoryPaymentService,
    InventoryService, OrderService, PaymentService, ReqwestTransport,
};
use session_store::{InMemorySessionStore, PostgresSessionStore, SessionStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::StartupError;

/// Orchestrator with every collaborator behind a trait object.
pub type Orchestrator = CheckoutOrchestrator<
    Arc<dyn SessionStore>,
    Arc<dyn InventoryService>,
    Arc<dyn OrderService>,
    Arc<dyn PaymentService>,
>;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// State backed entirely by in-memory collaborators.
    pub fn in_memory() -> Self {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let inventory: Arc<dyn InventoryService> = Arc::new(InMemoryInventoryService::new());
        let orders: Arc<dyn OrderService> = Arc::new(InMemoryOrderService::new());
        let payments: Arc<dyn PaymentService> = Arc::new(InMemoryPaymentService::new());
        Self::new(CheckoutOrchestrator::new(store, inventory, orders, payments))
    }
}

/// Wires the orchestrator from configuration.
///
/// Each configured downstream gets its own reqwest client behind its own
/// circuit breaker.
pub async fn build_state(config: &Config) -> Result<AppState, StartupError> {
    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresSessionStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL session store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, sessions are kept in memory");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let inventory: Arc<dyn InventoryService> = match &config.inventory_url {
        Some(url) => Arc::new(HttpInventoryService::new(
            url.clone(),
            downstream_transport(config, INVENTORY_SERVICE)?,
        )),
        None => {
            warn_in_memory(INVENTORY_SERVICE);
            Arc::new(InMemoryInventoryService::new())
        }
    };

    let orders: Arc<dyn OrderService> = match &config.order_url {
        Some(url) => Arc::new(HttpOrderService::new(
            url.clone(),
            downstream_transport(config, ORDER_SERVICE)?,
        )),
        None => {
            warn_in_memory(ORDER_SERVICE);
            Arc::new(InMemoryOrderService::new())
        }
    };

    let payments: Arc<dyn PaymentService> = match &config.payment_url {
        Some(url) => Arc::new(HttpPaymentService::new(
            url.clone(),
            downstream_transport(config, PAYMENT_SERVICE)?,
        )),
        None => {
            warn_in_memory(PAYMENT_SERVICE);
            Arc::new(InMemoryPaymentService::new())
        }
    };

    let orchestrator = CheckoutOrchestrator::new(store, inventory, orders, payments)
        .with_timeouts(config.saga_timeouts());
    Ok(AppState::new(orchestrator))
}

fn downstream_transport(
    config: &Config,
    service: &str,
) -> Result<CircuitBreakerTransport<ReqwestTransport>, StartupError> {
    let client = ReqwestTransport::builder()
        .timeout(config.downstream_timeout())
        .max_attempts(config.downstream_max_attempts)
        .user_agent(concat!("checkout-orchestrator/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(CircuitBreakerTransport::new(
        client,
        config.breaker_settings(service),
    )?)
}

fn warn_in_memory(service: &str) {
    tracing::warn!(service, "no URL configured, using in-memory stand-in");
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkouts", post(routes::checkouts::initiate))
        .route("/checkouts/{id}", get(routes::checkouts::get))
        .route(
            "/checkouts/{id}/shipping-address",
            put(routes::checkouts::set_shipping_address),
        )
        .route(
            "/checkouts/{id}/payment-method",
            put(routes::checkouts::set_payment_method),
        )
        .route("/checkouts/{id}/process", post(routes::checkouts::process))
        .route("/checkouts/{id}/cancel", post(routes::checkouts::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

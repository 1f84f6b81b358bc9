//! Checkout saga orchestration.
//!
//! A checkout is completed by three downstream calls run as a saga:
//! 1. Reserve inventory
//! 2. Create order
//! 3. Initiate payment
//!
//! If any step fails, previously completed steps are compensated in reverse
//! order and the session is marked failed. Every downstream call goes through
//! an [`HttpTransport`](transport::HttpTransport), which in production is a
//! reqwest client behind a per-destination circuit breaker.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod services;
pub mod steps;
pub mod transport;

pub use config::SagaTimeouts;
pub use context::{CallContext, ContextError};
pub use engine::{Checkpoint, NoCheckpoint, Saga, SagaReport, Step, StepError, StepFailure};
pub use error::{CheckoutError, ErrorKind};
pub use events::{
    CheckoutEvent, CheckoutEventType, EventPublisher, InMemoryEventPublisher, PublishError,
    TracingEventPublisher,
};
pub use orchestrator::CheckoutOrchestrator;
pub use services::{
    CallLog, DownstreamCall, DownstreamError, HttpInventoryService, HttpOrderService,
    HttpPaymentService, InMemoryInventoryService, InMemoryOrderService, InMemoryPaymentService,
    InventoryService, OrderService, PaymentService,
};
pub use steps::CheckoutRun;
pub use transport::{
    BreakerSettings, BreakerSettingsError, CircuitBreaker, CircuitBreakerTransport, CircuitState,
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};

//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, Utc};
use domain::{CheckoutSession, Currency, NewCheckoutItem, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CheckoutOrchestrator, InMemoryInventoryService, InMemoryOrderService, InMemoryPaymentService,
    InventoryService, OrderService, PaymentService,
};
use session_store::{InMemorySessionStore, SessionStore};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            api::routes::metrics::install_recorder().expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct Harness {
    app: axum::Router,
    store: InMemorySessionStore,
    inventory: InMemoryInventoryService,
    orders: InMemoryOrderService,
    payments: InMemoryPaymentService,
}

fn setup() -> Harness {
    let store = InMemorySessionStore::new();
    let inventory = InMemoryInventoryService::new();
    let orders = InMemoryOrderService::new();
    let payments = InMemoryPaymentService::new();

    let store_handle: Arc<dyn SessionStore> = Arc::new(store.clone());
    let inventory_handle: Arc<dyn InventoryService> = Arc::new(inventory.clone());
    let orders_handle: Arc<dyn OrderService> = Arc::new(orders.clone());
    let payments_handle: Arc<dyn PaymentService> = Arc::new(payments.clone());
    let orchestrator = CheckoutOrchestrator::new(
        store_handle,
        inventory_handle,
        orders_handle,
        payments_handle,
    );
    let app = api::create_app(AppState::new(orchestrator), get_metrics_handle());

    Harness {
        app,
        store,
        inventory,
        orders,
        payments,
    }
}

fn checkout_body() -> serde_json::Value {
    serde_json::json!({
        "user_id": "user-42",
        "currency": "usd",
        "items": [
            {
                "product_id": "prod-1",
                "variant_id": "var-1",
                "name": "Trail Shoe",
                "sku": "SHOE-42",
                "price": 2999,
                "quantity": 2
            },
            {
                "product_id": "prod-2",
                "variant_id": "var-7",
                "name": "Wool Socks",
                "sku": "SOCK-M",
                "price": 1500,
                "quantity": 1
            }
        ]
    })
}

fn address_body() -> serde_json::Value {
    serde_json::json!({
        "full_name": "Ada Lovelace",
        "address_line": "12 Analytical Row",
        "city": "London",
        "postal_code": "N1 9GU",
        "country": "GB"
    })
}

fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Creates a checkout with address and payment method set, returning its id.
async fn ready_checkout(app: &axum::Router) -> String {
    let (status, json) = send(app, json_request("POST", "/checkouts", &checkout_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        app,
        json_request(
            "PUT",
            &format!("/checkouts/{id}/shipping-address"),
            &address_body(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        app,
        json_request(
            "PUT",
            &format!("/checkouts/{id}/payment-method"),
            &serde_json::json!({ "payment_method": "card" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    id
}

#[tokio::test]
async fn test_health_check() {
    let app = api::create_app(AppState::in_memory(), get_metrics_handle());

    let (status, json) = send(&app, empty_request("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_initiate_checkout() {
    let harness = setup();

    let (status, json) = send(
        &harness.app,
        json_request("POST", "/checkouts", &checkout_body()),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "initiated");
    assert_eq!(json["currency"], "USD");
    assert_eq!(json["subtotal_amount"], 7498);
    assert_eq!(json["total_amount"], 7498);
    assert_eq!(json["items"].as_array().unwrap().len(), 2);
    assert!(json["shipping_address"].is_null());
    assert_eq!(harness.store.session_count().await, 1);
}

#[tokio::test]
async fn test_initiate_rejects_zero_quantity() {
    let harness = setup();
    let mut body = checkout_body();
    body["items"][0]["quantity"] = serde_json::json!(0);

    let (status, json) = send(&harness.app, json_request("POST", "/checkouts", &body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("SHOE-42"));
    assert_eq!(harness.store.session_count().await, 0);
}

#[tokio::test]
async fn test_get_checkout() {
    let harness = setup();
    let id = ready_checkout(&harness.app).await;

    let (status, json) = send(&harness.app, empty_request("GET", &format!("/checkouts/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["payment_method"], "card");
    assert_eq!(json["shipping_address"]["city"], "London");
}

#[tokio::test]
async fn test_get_nonexistent_checkout() {
    let harness = setup();
    let id = common::CheckoutId::new();

    let (status, json) = send(&harness.app, empty_request("GET", &format!("/checkouts/{id}"))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains(&id.to_string()));
}

#[tokio::test]
async fn test_invalid_checkout_id_format() {
    let harness = setup();

    let (status, json) = send(&harness.app, empty_request("GET", "/checkouts/not-a-uuid")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("not-a-uuid"));
}

#[tokio::test]
async fn test_process_checkout_completes() {
    let harness = setup();
    let id = ready_checkout(&harness.app).await;

    let (status, json) = send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/process")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["order_id"], "ORD-0001");
    assert_eq!(json["payment_id"], "PAY-0001");
    for item in json["items"].as_array().unwrap() {
        assert!(item["reservation_id"].is_string());
    }
    assert_eq!(harness.inventory.reservation_count(), 2);
    assert_eq!(harness.orders.active_order_count(), 1);
    assert_eq!(harness.payments.payment_count(), 1);
}

#[tokio::test]
async fn test_process_without_shipping_address() {
    let harness = setup();
    let (_, json) = send(
        &harness.app,
        json_request("POST", "/checkouts", &checkout_body()),
    )
    .await;
    let id = json["id"].as_str().unwrap();

    let (status, json) = send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/process")),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "shipping_address is required");
    assert_eq!(harness.inventory.reservation_count(), 0);
}

#[tokio::test]
async fn test_downstream_rejection_is_bad_gateway() {
    let harness = setup();
    let id = ready_checkout(&harness.app).await;
    harness.payments.set_fail_on_initiate(true);

    let (status, json) = send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/process")),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        json["error"],
        "initiate payment: payment service returned status 402: payment declined"
    );

    // Rolled back and stored as failed
    assert_eq!(harness.orders.active_order_count(), 0);
    assert_eq!(harness.inventory.reservation_count(), 0);
    let (_, json) = send(&harness.app, empty_request("GET", &format!("/checkouts/{id}"))).await;
    assert_eq!(json["status"], "failed");
    assert!(
        json["failure_reason"]
            .as_str()
            .unwrap()
            .starts_with("initiate payment:")
    );
}

#[tokio::test]
async fn test_cancel_checkout() {
    let harness = setup();
    let id = ready_checkout(&harness.app).await;

    let (status, json) = send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/cancel")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "failed");
    assert_eq!(json["failure_reason"], domain::CANCELLED_BY_USER);

    // A terminal session accepts no further changes
    let checkout_id: common::CheckoutId = id.parse().unwrap();
    let updates = harness.store.update_count(checkout_id).await;
    let (_, before) = send(&harness.app, empty_request("GET", &format!("/checkouts/{id}"))).await;

    let (status, _) = send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/cancel")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/process")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, after) = send(&harness.app, empty_request("GET", &format!("/checkouts/{id}"))).await;
    assert_eq!(after, before);
    assert_eq!(harness.store.update_count(checkout_id).await, updates);
    assert_eq!(harness.inventory.reservation_count(), 0);
}

#[tokio::test]
async fn test_expired_checkout_is_gone() {
    let harness = setup();
    let session = CheckoutSession::initiate(
        UserId::new("user-42").unwrap(),
        vec![NewCheckoutItem {
            product_id: "prod-1".to_string(),
            variant_id: "var-1".to_string(),
            name: "Trail Shoe".to_string(),
            sku: "SHOE-42".to_string(),
            price: 2999,
            quantity: 1,
        }],
        Currency::new("USD").unwrap(),
        Utc::now() - Duration::minutes(31),
    )
    .unwrap();
    harness.store.insert_raw(session.clone()).await;
    let id = session.id;

    let (status, _) = send(
        &harness.app,
        json_request(
            "PUT",
            &format!("/checkouts/{id}/payment-method"),
            &serde_json::json!({ "payment_method": "card" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);

    let (status, json) = send(&harness.app, empty_request("GET", &format!("/checkouts/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "expired");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let harness = setup();
    let id = ready_checkout(&harness.app).await;
    send(
        &harness.app,
        empty_request("POST", &format!("/checkouts/{id}/process")),
    )
    .await;

    let response = harness
        .app
        .clone()
        .oneshot(empty_request("GET", "/metrics"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("checkout_sessions_initiated_total"));
}

#[tokio::test]
async fn test_open_breaker_is_service_unavailable() {
    let inventory = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/inventory/reserve"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
        .expect(1)
        .mount(&inventory)
        .await;

    let config = Config {
        inventory_url: Some(inventory.uri()),
        breaker_min_requests: 1,
        breaker_failure_ratio: 1.0,
        ..Config::default()
    };
    let state = api::build_state(&config).await.unwrap();
    let app = api::create_app(state, get_metrics_handle());

    // First failure reaches the service and trips the breaker
    let id = ready_checkout(&app).await;
    let (status, json) = send(&app, empty_request("POST", &format!("/checkouts/{id}/process"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("status 500"));

    // Second checkout is refused without a network call
    let id = ready_checkout(&app).await;
    let response = app
        .clone()
        .oneshot(empty_request("POST", &format!("/checkouts/{id}/process")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=30).contains(&retry_after));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json["error"],
        "reserve inventory: inventory service call failed: circuit breaker 'inventory' is open"
    );
}

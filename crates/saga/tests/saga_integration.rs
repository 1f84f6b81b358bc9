//! End-to-end checkout saga runs against in-memory downstream services.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use domain::{
    CheckoutSession, CheckoutStatus, Currency, Money, NewCheckoutItem, ShippingAddress, UserId,
};
use saga::{
    CallContext, CallLog, CheckoutError, CheckoutEventType, CheckoutOrchestrator, DownstreamCall,
    ErrorKind, InMemoryEventPublisher, InMemoryInventoryService, InMemoryOrderService,
    InMemoryPaymentService, SagaTimeouts,
};
use session_store::InMemorySessionStore;
use tokio_util::sync::CancellationToken;

type TestOrchestrator = CheckoutOrchestrator<
    InMemorySessionStore,
    InMemoryInventoryService,
    InMemoryOrderService,
    InMemoryPaymentService,
>;

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    store: InMemorySessionStore,
    inventory: InMemoryInventoryService,
    orders: InMemoryOrderService,
    payments: InMemoryPaymentService,
    events: InMemoryEventPublisher,
    log: CallLog,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_timeouts(SagaTimeouts::default())
    }

    fn with_timeouts(timeouts: SagaTimeouts) -> Self {
        let log = CallLog::new();
        let store = InMemorySessionStore::new();
        let inventory = InMemoryInventoryService::new().with_call_log(log.clone());
        let orders = InMemoryOrderService::new().with_call_log(log.clone());
        let payments = InMemoryPaymentService::new().with_call_log(log.clone());
        let events = InMemoryEventPublisher::new();

        let orchestrator = CheckoutOrchestrator::new(
            store.clone(),
            inventory.clone(),
            orders.clone(),
            payments.clone(),
        )
        .with_publisher(Arc::new(events.clone()))
        .with_timeouts(timeouts);

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            inventory,
            orders,
            payments,
            events,
            log,
        }
    }

    async fn ready_checkout(&self) -> CheckoutSession {
        let session = self
            .orchestrator
            .initiate_checkout("user-42", items(), "USD")
            .await
            .unwrap();
        self.orchestrator
            .set_shipping_address(session.id, address())
            .await
            .unwrap();
        self.orchestrator
            .set_payment_method(session.id, "card")
            .await
            .unwrap()
    }
}

fn items() -> Vec<NewCheckoutItem> {
    vec![
        NewCheckoutItem {
            product_id: "PROD-1".into(),
            variant_id: "VAR-1".into(),
            name: "Widget".into(),
            sku: "WID-1".into(),
            price: 2999,
            quantity: 2,
        },
        NewCheckoutItem {
            product_id: "PROD-2".into(),
            variant_id: "VAR-2".into(),
            name: "Gadget".into(),
            sku: "GAD-1".into(),
            price: 1500,
            quantity: 1,
        },
    ]
}

fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Lovelace".into(),
        address_line: "1 Analytical Way".into(),
        city: "London".into(),
        postal_code: "N1 9GU".into(),
        country: "GB".into(),
    }
}

#[tokio::test]
async fn happy_path_completes_and_publishes() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;

    let completed = h.orchestrator.process_checkout(session.id).await.unwrap();

    assert_eq!(completed.status, CheckoutStatus::Completed);
    assert_eq!(completed.total_amount, Money::from_minor(7498));
    assert_eq!(completed.reservation_ids(), vec!["RES-0001", "RES-0002"]);
    assert_eq!(
        h.log.calls(),
        vec![
            DownstreamCall::ReserveInventory,
            DownstreamCall::CreateOrder,
            DownstreamCall::InitiatePayment("ORD-0001".into()),
        ]
    );

    let order = h.orders.order("ORD-0001").unwrap();
    assert_eq!(order.total_amount, 7498);
    assert_eq!(order.shipping_address, address());
    assert_eq!(h.payments.payment("PAY-0001").unwrap().payment_method, "card");

    let stored = h.orchestrator.get_checkout(session.id).await.unwrap();
    assert_eq!(stored, completed);

    assert!(h.events.wait_for(1, Duration::from_secs(1)).await);
    let event = &h.events.events()[0];
    assert_eq!(event.event_type, CheckoutEventType::Completed);
    assert_eq!(event.payment_id.as_deref(), Some("PAY-0001"));
}

#[tokio::test]
async fn reserve_failure_runs_no_compensation() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.inventory.set_fail_on_reserve(true);

    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "reserve inventory: inventory service returned status 409: insufficient stock"
    );
    assert_eq!(err.kind(), ErrorKind::Downstream);
    assert_eq!(h.log.calls(), vec![DownstreamCall::ReserveInventory]);

    let stored = h.orchestrator.get_checkout(session.id).await.unwrap();
    assert_eq!(stored.status, CheckoutStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some(err.to_string().as_str()));

    assert!(h.events.wait_for(1, Duration::from_secs(1)).await);
    assert_eq!(h.events.events()[0].event_type, CheckoutEventType::Failed);
}

#[tokio::test]
async fn order_failure_releases_inventory() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.orders.set_fail_on_create(true);

    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();

    assert!(err.to_string().starts_with("create order: "));
    assert_eq!(
        h.log.calls(),
        vec![
            DownstreamCall::ReserveInventory,
            DownstreamCall::CreateOrder,
            DownstreamCall::ReleaseInventory(vec!["RES-0001".into(), "RES-0002".into()]),
        ]
    );
    assert_eq!(h.inventory.reservation_count(), 0);

    let stored = h.orchestrator.get_checkout(session.id).await.unwrap();
    assert_eq!(stored.status, CheckoutStatus::Failed);
    assert!(stored.reservation_ids().is_empty());
    assert!(stored.order_id.is_none());
}

#[tokio::test]
async fn payment_failure_compensates_in_reverse_order() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.payments.set_fail_on_initiate(true);

    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "initiate payment: payment service returned status 402: payment declined"
    );
    assert_eq!(
        h.log.calls(),
        vec![
            DownstreamCall::ReserveInventory,
            DownstreamCall::CreateOrder,
            DownstreamCall::InitiatePayment("ORD-0001".into()),
            DownstreamCall::CancelOrder("ORD-0001".into()),
            DownstreamCall::ReleaseInventory(vec!["RES-0001".into(), "RES-0002".into()]),
        ]
    );
    assert!(h.orders.is_cancelled("ORD-0001"));
    assert_eq!(h.payments.payment_count(), 0);
}

#[tokio::test]
async fn failed_release_keeps_reservations_for_reconciliation() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.orders.set_fail_on_create(true);
    h.inventory.set_fail_on_release(true);

    h.orchestrator
        .process_checkout(session.id)
        .await
        .unwrap_err();

    let stored = h.orchestrator.get_checkout(session.id).await.unwrap();
    assert_eq!(stored.status, CheckoutStatus::Failed);
    assert_eq!(stored.reservation_ids(), vec!["RES-0001", "RES-0002"]);
}

#[tokio::test]
async fn validation_failures_make_no_downstream_calls() {
    let h = TestHarness::new();
    let session = h
        .orchestrator
        .initiate_checkout("user-42", items(), "USD")
        .await
        .unwrap();

    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = h
        .orchestrator
        .set_payment_method(session.id, "   ")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut bad_address = address();
    bad_address.city = String::new();
    let err = h
        .orchestrator
        .set_shipping_address(session.id, bad_address)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "city is required");

    assert!(h.log.is_empty());
    assert_eq!(
        h.orchestrator.get_checkout(session.id).await.unwrap().status,
        CheckoutStatus::Initiated
    );
}

#[tokio::test]
async fn expired_session_is_marked_once_and_reported_gone() {
    let h = TestHarness::new();
    let mut session = CheckoutSession::initiate(
        UserId::new("user-42").unwrap(),
        items(),
        Currency::new("USD").unwrap(),
        Utc::now() - ChronoDuration::minutes(45),
    )
    .unwrap();
    session.shipping_address = Some(address());
    let id = session.id;
    h.store.insert_raw(session).await;

    let first = h.orchestrator.process_checkout(id).await.unwrap_err();
    let second = h
        .orchestrator
        .set_payment_method(id, "card")
        .await
        .unwrap_err();
    let third = h.orchestrator.cancel_checkout(id).await.unwrap_err();

    for err in [first, second, third] {
        assert!(matches!(err, CheckoutError::Expired(expired) if expired == id));
        assert_eq!(err.kind(), ErrorKind::Gone);
    }
    assert_eq!(h.store.update_count(id).await, 1);
    assert!(h.log.is_empty());

    let stored = h.orchestrator.get_checkout(id).await.unwrap();
    assert_eq!(stored.status, CheckoutStatus::Expired);
}

#[tokio::test]
async fn repeated_address_updates_on_expired_session_persist_expiry_once() {
    let h = TestHarness::new();
    let session = CheckoutSession::initiate(
        UserId::new("user-42").unwrap(),
        items(),
        Currency::new("USD").unwrap(),
        Utc::now() - ChronoDuration::minutes(31),
    )
    .unwrap();
    let id = session.id;
    h.store.insert_raw(session).await;

    for _ in 0..3 {
        let err = h
            .orchestrator
            .set_shipping_address(id, address())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Expired(expired) if expired == id));
    }

    assert_eq!(h.store.update_count(id).await, 1);
    let stored = h.orchestrator.get_checkout(id).await.unwrap();
    assert_eq!(stored.status, CheckoutStatus::Expired);
    assert!(stored.shipping_address.is_none());
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn get_checkout_does_not_expire() {
    let h = TestHarness::new();
    let session = CheckoutSession::initiate(
        UserId::new("user-42").unwrap(),
        items(),
        Currency::new("USD").unwrap(),
        Utc::now() - ChronoDuration::hours(2),
    )
    .unwrap();
    let id = session.id;
    h.store.insert_raw(session).await;

    let stored = h.orchestrator.get_checkout(id).await.unwrap();

    assert_eq!(stored.status, CheckoutStatus::Initiated);
    assert_eq!(h.store.update_count(id).await, 0);
}

#[tokio::test]
async fn tampered_amounts_are_recomputed_before_charging() {
    let h = TestHarness::new();
    let mut session = h.ready_checkout().await;
    session.subtotal_amount = Money::from_minor(9999);
    session.total_amount = Money::from_minor(9999);
    h.store.insert_raw(session.clone()).await;

    let completed = h.orchestrator.process_checkout(session.id).await.unwrap();

    assert_eq!(completed.subtotal_amount, Money::from_minor(7498));
    assert_eq!(completed.total_amount, Money::from_minor(7498));
    assert_eq!(h.orders.order("ORD-0001").unwrap().subtotal_amount, 7498);
    assert_eq!(h.payments.payment("PAY-0001").unwrap().amount, 7498);
}

#[tokio::test]
async fn terminal_sessions_reject_every_mutation() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.orchestrator.process_checkout(session.id).await.unwrap();

    let errors = [
        h.orchestrator.process_checkout(session.id).await.unwrap_err(),
        h.orchestrator.cancel_checkout(session.id).await.unwrap_err(),
        h.orchestrator
            .set_shipping_address(session.id, address())
            .await
            .unwrap_err(),
        h.orchestrator
            .set_payment_method(session.id, "card")
            .await
            .unwrap_err(),
    ];

    for err in errors {
        assert!(matches!(
            err,
            CheckoutError::Terminal {
                status: CheckoutStatus::Completed,
                ..
            }
        ));
    }
    assert_eq!(h.log.len(), 3);
}

#[tokio::test]
async fn cancel_leaves_completed_and_failed_sessions_untouched() {
    let h = TestHarness::new();

    let completed = h.ready_checkout().await;
    h.orchestrator.process_checkout(completed.id).await.unwrap();

    h.payments.set_fail_on_initiate(true);
    let failed = h.ready_checkout().await;
    h.orchestrator.process_checkout(failed.id).await.unwrap_err();

    for (id, status) in [
        (completed.id, CheckoutStatus::Completed),
        (failed.id, CheckoutStatus::Failed),
    ] {
        let before = h.orchestrator.get_checkout(id).await.unwrap();
        let updates = h.store.update_count(id).await;
        assert_eq!(before.status, status);

        let err = h.orchestrator.cancel_checkout(id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(h.store.update_count(id).await, updates);
        assert_eq!(h.orchestrator.get_checkout(id).await.unwrap(), before);
    }
}

#[tokio::test]
async fn mid_saga_session_cannot_be_processed_again() {
    let h = TestHarness::new();
    let mut session = h.ready_checkout().await;
    session.mark_items_reserved(Utc::now()).unwrap();
    h.store.insert_raw(session.clone()).await;

    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn cancel_is_local_only() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;

    let cancelled = h.orchestrator.cancel_checkout(session.id).await.unwrap();

    assert_eq!(cancelled.status, CheckoutStatus::Failed);
    assert_eq!(cancelled.failure_reason.as_deref(), Some("cancelled by user"));
    assert!(h.log.is_empty());
    assert!(h.events.wait_for(1, Duration::from_secs(1)).await);
    assert_eq!(h.events.events()[0].event_type, CheckoutEventType::Failed);
}

#[tokio::test]
async fn reservation_count_mismatch_fails_and_releases() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.inventory.set_drop_last_reservation(true);

    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "reserve inventory: invalid response from inventory service: expected 2 reservation ids, got 1"
    );
    assert_eq!(
        h.log.calls(),
        vec![
            DownstreamCall::ReserveInventory,
            DownstreamCall::ReleaseInventory(vec!["RES-0001".into()]),
        ]
    );
    assert_eq!(h.inventory.reservation_count(), 0);
}

#[tokio::test]
async fn step_timeout_fails_the_step() {
    let h = TestHarness::with_timeouts(SagaTimeouts {
        inventory: Some(Duration::from_millis(100)),
        ..SagaTimeouts::default()
    });
    let session = h.ready_checkout().await;
    h.inventory.set_reserve_delay(Some(Duration::from_secs(2)));

    let started = std::time::Instant::now();
    let err = h.orchestrator.process_checkout(session.id).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(
        err.to_string(),
        "reserve inventory: inventory service call failed: deadline exceeded"
    );
}

#[tokio::test]
async fn caller_cancellation_still_compensates() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.payments.set_delay(Some(Duration::from_secs(10)));

    let token = CancellationToken::new();
    let ctx = CallContext::with_cancellation(token.clone());
    let orchestrator = Arc::clone(&h.orchestrator);
    let id = session.id;
    let task = tokio::spawn(async move { orchestrator.process_checkout_with(id, &ctx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    let err = task.await.unwrap().unwrap_err();

    assert_eq!(
        err.to_string(),
        "initiate payment: payment service call failed: cancelled by caller"
    );
    assert!(h.orders.is_cancelled("ORD-0001"));
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(
        h.orchestrator.get_checkout(id).await.unwrap().status,
        CheckoutStatus::Failed
    );
}

#[tokio::test]
async fn persistence_failure_after_step_does_not_abort_saga() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;
    h.store.set_fail_on_update(true);

    let completed = h.orchestrator.process_checkout(session.id).await.unwrap();

    assert_eq!(completed.status, CheckoutStatus::Completed);
    assert_eq!(h.log.len(), 3);
    assert_eq!(
        h.orchestrator.get_checkout(session.id).await.unwrap().status,
        CheckoutStatus::Initiated
    );
}

#[tokio::test]
async fn publisher_failure_does_not_change_outcome() {
    let h = TestHarness::new();
    h.events.set_fail(true);
    let session = h.ready_checkout().await;

    let completed = h.orchestrator.process_checkout(session.id).await.unwrap();

    assert_eq!(completed.status, CheckoutStatus::Completed);
    assert!(!h.events.wait_for(1, Duration::from_millis(50)).await);
}

#[tokio::test]
async fn concurrent_edits_last_writer_wins() {
    let h = TestHarness::new();
    let session = h.ready_checkout().await;

    let (a, b) = tokio::join!(
        h.orchestrator.set_payment_method(session.id, "card"),
        h.orchestrator.set_payment_method(session.id, "paypal"),
    );
    a.unwrap();
    b.unwrap();

    let stored = h.orchestrator.get_checkout(session.id).await.unwrap();
    let method = stored.payment_method.unwrap();
    assert!(method.as_str() == "card" || method.as_str() == "paypal");
}

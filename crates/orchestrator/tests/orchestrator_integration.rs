//! End-to-end order workflows over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use common::{Money, ProductId, UserId};
use domain::{OrderStatus, Product};
use inventory::{InventoryLedger, StockLine};
use orchestrator::{
    ErrorKind, ExpirySweeper, ManualClock, OrchestratorConfig, OrderOrchestrator, PaymentGateways,
    PaymentMethod, RetryPolicy, ScriptedGateway, SweeperConfig,
};
use store::InMemoryStore;

const WIDGET: ProductId = ProductId::new(1);
const GADGET: ProductId = ProductId::new(2);
const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

struct TestHarness {
    orchestrator: Arc<OrderOrchestrator<InMemoryStore>>,
    ledger: InventoryLedger<InMemoryStore>,
    store: InMemoryStore,
    clock: ManualClock,
}

impl TestHarness {
    async fn new(gateway: ScriptedGateway) -> Self {
        let store = InMemoryStore::new();
        let ledger = InventoryLedger::new(store.clone());

        let widget = Product::new(WIDGET, "SKU-001", "Widget", Money::from_cents(1000)).unwrap();
        let gadget = Product::new(GADGET, "SKU-002", "Gadget", Money::from_cents(2500)).unwrap();
        ledger.create_product(&widget, 10).await.unwrap();
        ledger.create_product(&gadget, 5).await.unwrap();

        let gateways = PaymentGateways::simulated().with(PaymentMethod::CreditCard, gateway);
        let clock = ManualClock::default();
        let orchestrator = OrderOrchestrator::new(
            store.clone(),
            gateways,
            OrchestratorConfig {
                retry: RetryPolicy::immediate(3),
            },
        )
        .with_clock(clock.clone());

        Self {
            orchestrator: Arc::new(orchestrator),
            ledger,
            store,
            clock,
        }
    }

    async fn counters(&self, product_id: ProductId) -> (u32, u32) {
        let record = self.ledger.snapshot(product_id).await.unwrap();
        (record.quantity(), record.reserved_quantity())
    }

    async fn status(&self, order_id: common::OrderId) -> OrderStatus {
        self.orchestrator.get_order(order_id).await.unwrap().status()
    }

    async fn place(&self, user_id: UserId, lines: &[StockLine]) -> common::OrderId {
        let outcome = self
            .orchestrator
            .place_order(user_id, lines, "creditcard")
            .await;
        assert!(outcome.success, "placement failed: {outcome:?}");
        outcome.order_id.unwrap()
    }
}

#[tokio::test]
async fn test_place_then_cancel_restores_counters() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let before = (h.counters(WIDGET).await, h.counters(GADGET).await);

    let order_id = h
        .place(
            ALICE,
            &[
                StockLine::new(WIDGET, 2),
                StockLine::new(GADGET, 1),
                StockLine::new(WIDGET, 3),
            ],
        )
        .await;
    assert_eq!(h.counters(WIDGET).await, (10, 5));
    assert_eq!(h.counters(GADGET).await, (5, 1));

    let order = h.orchestrator.get_order(order_id).await.unwrap();
    assert_eq!(order.items().len(), 3);
    assert_eq!(order.total_amount(), Money::from_cents(7500));

    let cancelled = h.orchestrator.cancel_order(order_id, ALICE, None).await;
    assert!(cancelled.success);
    assert_eq!(
        (h.counters(WIDGET).await, h.counters(GADGET).await),
        before
    );
}

#[tokio::test]
async fn test_placement_is_all_or_nothing() {
    let h = TestHarness::new(ScriptedGateway::new()).await;

    let outcome = h
        .orchestrator
        .place_order(
            ALICE,
            &[StockLine::new(WIDGET, 2), StockLine::new(GADGET, 6)],
            "creditcard",
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(ErrorKind::InsufficientStock));
    assert_eq!(outcome.status, Some(OrderStatus::Failed));
    assert!(outcome.details.iter().any(|d| d.contains("product 2")));
    assert_eq!(h.counters(WIDGET).await, (10, 0));
    assert_eq!(h.counters(GADGET).await, (5, 0));
}

#[tokio::test]
async fn test_expiry_before_timeout_is_noop() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 2)]).await;

    h.clock.advance(chrono::Duration::seconds(30));
    let outcome = h
        .orchestrator
        .auto_cancel_pending_order(order_id, Duration::from_secs(60))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error, None);
    assert_eq!(h.status(order_id).await, OrderStatus::Pending);
    assert_eq!(h.counters(WIDGET).await, (10, 2));
}

#[tokio::test]
async fn test_failing_gateway_keeps_reservation() {
    let gateway = ScriptedGateway::declining();
    let h = TestHarness::new(gateway.clone()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 2)]).await;

    let outcome = h
        .orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(ErrorKind::PaymentFailed));
    assert_eq!(gateway.attempts(), 4);
    assert_eq!(h.status(order_id).await, OrderStatus::Pending);
    assert_eq!(h.counters(WIDGET).await, (10, 2));

    // The reservation was kept, so paying again once the gateway recovers works.
    gateway.set_fail(false);
    let retried = h
        .orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;
    assert!(retried.success, "{retried:?}");
}

#[tokio::test]
async fn test_successful_payment_reduces_stock() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let order_id = h
        .place(ALICE, &[StockLine::new(WIDGET, 4), StockLine::new(GADGET, 2)])
        .await;

    let outcome = h
        .orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.status, Some(OrderStatus::Paid));
    assert_eq!(outcome.payment.unwrap().attempts, 1);
    assert_eq!(h.counters(WIDGET).await, (6, 0));
    assert_eq!(h.counters(GADGET).await, (3, 0));

    let log = h.ledger.log(WIDGET).await.unwrap();
    assert!(log.iter().any(|entry| entry.reason.starts_with("commit for order")));
}

#[tokio::test]
async fn test_payment_retries_transient_declines() {
    let gateway = ScriptedGateway::new();
    gateway.fail_first(2);
    let h = TestHarness::new(gateway.clone()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 1)]).await;

    let outcome = h
        .orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.payment.unwrap().attempts, 3);
    assert_eq!(gateway.charge_count(), 1);
}

#[tokio::test]
async fn test_paying_twice_charges_once() {
    let gateway = ScriptedGateway::new();
    let h = TestHarness::new(gateway.clone()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 1)]).await;

    assert!(
        h.orchestrator
            .pay_pending_order(order_id, ALICE, "creditcard")
            .await
            .success
    );
    let second = h
        .orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;

    assert_eq!(second.error, Some(ErrorKind::InvalidStateTransition));
    assert_eq!(gateway.charge_count(), 1);
    assert_eq!(h.counters(WIDGET).await, (9, 0));
}

#[tokio::test]
async fn test_cancel_paid_order_fails_without_changes() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 3)]).await;
    h.orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;
    let log_len = h.store.log_count().await;

    let outcome = h.orchestrator.cancel_order(order_id, ALICE, None).await;

    assert_eq!(outcome.error, Some(ErrorKind::InvalidStateTransition));
    assert_eq!(h.status(order_id).await, OrderStatus::Paid);
    assert_eq!(h.counters(WIDGET).await, (7, 0));
    assert_eq!(h.store.log_count().await, log_len);
}

#[tokio::test]
async fn test_cancel_by_other_user_is_unauthorized() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 3)]).await;

    let outcome = h.orchestrator.cancel_order(order_id, BOB, None).await;

    assert_eq!(outcome.error, Some(ErrorKind::Unauthorized));
    assert_eq!(h.status(order_id).await, OrderStatus::Pending);
    assert_eq!(h.counters(WIDGET).await, (10, 3));
}

#[tokio::test]
async fn test_cancel_confirmed_order_restocks() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let order_id = h.place(ALICE, &[StockLine::new(GADGET, 2)]).await;
    h.orchestrator
        .pay_pending_order(order_id, ALICE, "creditcard")
        .await;
    assert!(h.orchestrator.confirm_order(order_id).await.success);
    assert_eq!(h.counters(GADGET).await, (3, 0));

    let outcome = h
        .orchestrator
        .cancel_order(order_id, ALICE, Some("returned"))
        .await;

    assert!(outcome.success);
    assert_eq!(h.counters(GADGET).await, (5, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_inflight_payment_needs_reconciliation() {
    let (gateway, gate) = ScriptedGateway::gated();
    let h = TestHarness::new(gateway.clone()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 4)]).await;

    let pay = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move {
            orchestrator
                .pay_pending_order(order_id, ALICE, "creditcard")
                .await
        }
    });

    gate.wait_entered().await;
    let cancelled = h.orchestrator.cancel_order(order_id, ALICE, None).await;
    assert!(cancelled.success, "{cancelled:?}");
    gate.release();

    let paid = pay.await.unwrap();
    assert!(!paid.success);
    assert!(paid.needs_reconciliation());
    assert!(paid.requires_manual_review);
    assert_eq!(paid.status, Some(OrderStatus::Cancelled));
    assert!(paid.payment.is_some());

    let order = h.orchestrator.get_order(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert!(order.requires_review());
    // Released once by the cancel, never committed.
    assert_eq!(h.counters(WIDGET).await, (10, 0));
    assert_eq!(gateway.charge_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stock_drift_during_payment_flags_paid_order() {
    let (gateway, gate) = ScriptedGateway::gated();
    let h = TestHarness::new(gateway).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 4)]).await;

    let pay = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move {
            orchestrator
                .pay_pending_order(order_id, ALICE, "creditcard")
                .await
        }
    });

    gate.wait_entered().await;
    h.ledger.release(WIDGET, 4).await.unwrap();
    gate.release();

    let outcome = pay.await.unwrap();
    assert!(outcome.needs_reconciliation());
    assert_eq!(outcome.status, Some(OrderStatus::Paid));
    assert_eq!(outcome.details.len(), 1);

    let order = h.orchestrator.get_order(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert!(order.requires_review());
    assert_eq!(h.counters(WIDGET).await, (10, 0));
}

#[tokio::test]
async fn test_flagged_paid_order_cannot_be_confirmed_or_cancelled() {
    let (gateway, gate) = ScriptedGateway::gated();
    let h = TestHarness::new(gateway).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 4)]).await;

    let pay = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move {
            orchestrator
                .pay_pending_order(order_id, ALICE, "creditcard")
                .await
        }
    });

    gate.wait_entered().await;
    h.ledger.release(WIDGET, 4).await.unwrap();
    gate.release();
    assert!(pay.await.unwrap().needs_reconciliation());
    assert_eq!(h.counters(WIDGET).await, (10, 0));

    let confirmed = h.orchestrator.confirm_order(order_id).await;
    assert!(!confirmed.success);
    assert_eq!(confirmed.error, Some(ErrorKind::ReconciliationRequired));

    let cancelled = h.orchestrator.cancel_order(order_id, ALICE, None).await;
    assert!(!cancelled.success);
    assert_eq!(cancelled.error, Some(ErrorKind::ReconciliationRequired));

    assert_eq!(h.status(order_id).await, OrderStatus::Paid);
    assert_eq!(h.counters(WIDGET).await, (10, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pay_and_cancel_have_one_winner() {
    for _ in 0..20 {
        let h = TestHarness::new(ScriptedGateway::new()).await;
        let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 4)]).await;

        let pay = tokio::spawn({
            let orchestrator = h.orchestrator.clone();
            async move {
                orchestrator
                    .pay_pending_order(order_id, ALICE, "creditcard")
                    .await
            }
        });
        let cancel = tokio::spawn({
            let orchestrator = h.orchestrator.clone();
            async move { orchestrator.cancel_order(order_id, ALICE, None).await }
        });
        let (paid, cancelled) = (pay.await.unwrap(), cancel.await.unwrap());

        assert!(!(paid.success && cancelled.success));
        match h.status(order_id).await {
            OrderStatus::Paid => assert_eq!(h.counters(WIDGET).await, (6, 0)),
            OrderStatus::Cancelled => assert_eq!(h.counters(WIDGET).await, (10, 0)),
            other => panic!("unexpected status {other}"),
        }
    }
}

#[tokio::test]
async fn test_sweeper_expires_stale_orders() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let stale = h.place(ALICE, &[StockLine::new(WIDGET, 2)]).await;
    let paid = h.place(BOB, &[StockLine::new(GADGET, 1)]).await;
    h.orchestrator
        .pay_pending_order(paid, BOB, "creditcard")
        .await;

    h.clock.advance(chrono::Duration::seconds(61));
    let fresh = h.place(BOB, &[StockLine::new(WIDGET, 1)]).await;

    let sweeper = ExpirySweeper::new(h.orchestrator.clone(), SweeperConfig::default());
    let report = sweeper.tick().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.status(stale).await, OrderStatus::Cancelled);
    assert_eq!(h.status(paid).await, OrderStatus::Paid);
    assert_eq!(h.status(fresh).await, OrderStatus::Pending);
    assert_eq!(h.counters(WIDGET).await, (10, 1));
}

#[tokio::test]
async fn test_order_queries() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let first = h.place(ALICE, &[StockLine::new(WIDGET, 1)]).await;
    h.clock.advance(chrono::Duration::seconds(1));
    let second = h.place(ALICE, &[StockLine::new(GADGET, 1)]).await;
    h.place(BOB, &[StockLine::new(WIDGET, 1)]).await;

    let mine: Vec<_> = h
        .orchestrator
        .orders_for_user(ALICE)
        .await
        .unwrap()
        .iter()
        .map(|order| order.id())
        .collect();
    assert_eq!(mine, vec![second, first]);

    let pending = h.orchestrator.pending_order_ids().await.unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0], first);
}

#[tokio::test]
async fn test_simulated_pending_method_never_pays() {
    let h = TestHarness::new(ScriptedGateway::new()).await;
    let order_id = h.place(ALICE, &[StockLine::new(WIDGET, 1)]).await;

    let outcome = h
        .orchestrator
        .pay_pending_order(order_id, ALICE, "pending")
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::PaymentFailed));
    assert_eq!(h.status(order_id).await, OrderStatus::Pending);
}

//! The order orchestrator: placement, payment, confirmation, cancellation
//! and expiry, each owning its transaction boundaries.
//!
//! Every write path locks the order row before touching it, so payment and
//! cancellation of the same order are serialized. Payment runs in two
//! transactions around the gateway call; no row lock is held while the
//! gateway is talking.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use common::{Money, OrderId, ProductId, UserId};
use domain::{Order, OrderItem, OrderStatus};
use inventory::{
    CommitOutcome, StockLine, bulk_check_availability, check_reservations, ledger,
};
use store::{Store, Transaction, finish};

use crate::clock::{Clock, SystemClock};
use crate::error::{OrchestratorError, Result};
use crate::outcome::{OrderOutcome, PaymentReceipt};
use crate::payment::{self, PaymentError, PaymentGateways, PaymentMethod, PaymentRequest};
use crate::retry::RetryPolicy;

/// Typed settings for [`OrderOrchestrator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorConfig {
    /// Retry policy wrapped around every gateway call.
    pub retry: RetryPolicy,
}

/// Result of the placement transaction.
enum Placement {
    Placed(Order),
    Rejected { order: Order, details: Vec<String> },
}

/// Result of the settlement transaction after a captured payment.
enum Settlement {
    Paid(Order),
    Reconcile {
        order: Order,
        reason: String,
        details: Vec<String>,
    },
}

/// Coordinates the ledger, the order aggregate and the payment gateways.
pub struct OrderOrchestrator<S: Store> {
    store: S,
    gateways: PaymentGateways,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Clone for OrderOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateways: self.gateways.clone(),
            retry: self.retry,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: Store> OrderOrchestrator<S> {
    pub fn new(store: S, gateways: PaymentGateways, config: OrchestratorConfig) -> Self {
        Self {
            store,
            gateways,
            retry: config.retry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock, e.g. with a `ManualClock` in tests.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Places an order: pre-checks stock, snapshots prices, creates the order
    /// as `Pending` and reserves every line, all in one transaction.
    ///
    /// A stock shortfall is recorded as a `Failed` order and reported with
    /// per-item details. The gateway is not called here.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        items: &[StockLine],
        payment_method: &str,
    ) -> OrderOutcome {
        let order_id = OrderId::new();
        match self.try_place(order_id, user_id, items, payment_method).await {
            Ok(Placement::Placed(order)) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(
                    %order_id,
                    total = %order.total_amount(),
                    "order placed, awaiting payment"
                );
                OrderOutcome::succeeded(&order, "Order placed, awaiting payment")
            }
            Ok(Placement::Rejected { order, details }) => {
                metrics::counter!("orders_failed_total").increment(1);
                tracing::warn!(%order_id, ?details, "order rejected for insufficient stock");
                OrderOutcome::rejected(&order, details)
            }
            Err(err) => failed(None, "place order", err),
        }
    }

    async fn try_place(
        &self,
        order_id: OrderId,
        user_id: UserId,
        items: &[StockLine],
        payment_method: &str,
    ) -> Result<Placement> {
        if items.is_empty() {
            return Err(OrchestratorError::InvalidArgument(
                "order must contain at least one item".to_string(),
            ));
        }
        if !user_id.is_valid() {
            return Err(OrchestratorError::InvalidArgument(
                "user id is required".to_string(),
            ));
        }
        if let Some(line) = items.iter().find(|line| line.quantity == 0) {
            return Err(OrchestratorError::InvalidArgument(format!(
                "quantity for product {} must be greater than 0",
                line.product_id
            )));
        }
        self.resolve_method(payment_method)?;

        let mut tx = self.store.begin().await?;
        let result = self.place_in(&mut tx, order_id, user_id, items).await;
        finish(tx, result).await
    }

    async fn place_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        user_id: UserId,
        items: &[StockLine],
    ) -> Result<Placement> {
        let now = self.clock.now();

        let report = bulk_check_availability(tx, items).await?;
        if !report.all_available() {
            let order = Order::failed(order_id, user_id, now);
            tx.insert_order(&order).await?;
            return Ok(Placement::Rejected {
                order,
                details: report.details(),
            });
        }

        let ids: Vec<ProductId> = items
            .iter()
            .map(|line| line.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let prices: HashMap<ProductId, Money> = tx
            .products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product.price))
            .collect();

        let lines = items
            .iter()
            .map(|line| {
                prices
                    .get(&line.product_id)
                    .map(|&price| OrderItem::new(line.product_id, line.quantity, price))
                    .ok_or_else(|| {
                        OrchestratorError::NotFound(format!("product {}", line.product_id))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let order = Order::pending(order_id, user_id, lines, now)?;
        if !order.total_amount().is_positive() {
            return Err(OrchestratorError::InvalidArgument(format!(
                "order total must be positive, got {}",
                order.total_amount()
            )));
        }

        tx.insert_order(&order).await?;
        ledger::reserve_all(tx, items, &format!("reserve for order {order_id}")).await?;
        Ok(Placement::Placed(order))
    }

    /// Charges a `Pending` order and, on success, commits its stock and marks
    /// it `Paid`.
    ///
    /// A failed charge leaves the order and its reservation untouched so the
    /// caller may retry. A captured payment that can no longer be settled
    /// normally marks or keeps the order for manual review and reports
    /// `ReconciliationRequired`.
    #[tracing::instrument(skip(self))]
    pub async fn pay_pending_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        payment_method: &str,
    ) -> OrderOutcome {
        match self.try_pay(order_id, user_id, payment_method).await {
            Ok(outcome) => outcome,
            Err(err) => failed(Some(order_id), "pay order", err),
        }
    }

    async fn try_pay(
        &self,
        order_id: OrderId,
        user_id: UserId,
        payment_method: &str,
    ) -> Result<OrderOutcome> {
        let (method, gateway) = self
            .gateways
            .resolve(payment_method)
            .map_err(invalid_method)?;

        // Phase one: verify under the order lock, then let go before charging.
        let mut tx = self.store.begin().await?;
        let result = self.prepare_payment(&mut tx, order_id, user_id).await;
        let amount = finish(tx, result).await?;

        let request = PaymentRequest::for_order(order_id, amount);
        let (response, attempts) = payment::charge(gateway.as_ref(), &request, &self.retry)
            .await
            .map_err(|err| {
                tracing::warn!(
                    %order_id,
                    attempts = err.attempts,
                    error = %err.last_error,
                    "payment failed, order stays pending"
                );
                OrchestratorError::PaymentFailed {
                    attempts: err.attempts,
                    message: err.last_error.to_string(),
                }
            })?;
        let receipt = PaymentReceipt::new(method, response, attempts);

        // Phase two: settle under the order lock.
        let mut tx = self.store.begin().await?;
        let result = self.settle_payment(&mut tx, order_id, &receipt).await;
        match finish(tx, result).await? {
            Settlement::Paid(order) => {
                metrics::counter!("orders_paid_total").increment(1);
                tracing::info!(
                    %order_id,
                    transaction_id = %receipt.transaction_id,
                    attempts,
                    "order paid"
                );
                Ok(OrderOutcome::succeeded(&order, "Payment processed successfully")
                    .with_payment(receipt))
            }
            Settlement::Reconcile {
                order,
                reason,
                details,
            } => {
                metrics::counter!("orders_reconciliation_total").increment(1);
                tracing::error!(
                    %order_id,
                    transaction_id = %receipt.transaction_id,
                    status = %order.status(),
                    %reason,
                    "payment captured but order needs manual reconciliation"
                );
                Ok(OrderOutcome::reconciliation(&order, receipt, reason, details))
            }
        }
    }

    /// Returns the amount to charge.
    async fn prepare_payment(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Money> {
        let order = lock_order(tx, order_id).await?;
        ensure_owner(&order, user_id)?;
        if !order.status().can_pay() {
            return Err(OrchestratorError::InvalidStateTransition {
                current: order.status(),
                requested: OrderStatus::Paid,
            });
        }

        let shortfalls = check_reservations(tx, &stock_lines(&order)).await?;
        if !shortfalls.is_empty() {
            return Err(OrchestratorError::InsufficientStock {
                details: shortfalls.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(order.total_amount())
    }

    async fn settle_payment(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        receipt: &PaymentReceipt,
    ) -> Result<Settlement> {
        let now = self.clock.now();
        let mut order = tx.lock_order(order_id).await?.ok_or_else(|| {
            OrchestratorError::ReconciliationRequired {
                order_id,
                reason: format!(
                    "payment {} captured for an order that no longer exists",
                    receipt.transaction_id
                ),
            }
        })?;

        if order.status() != OrderStatus::Pending {
            let reason = format!(
                "payment {} captured after order left pending (now {})",
                receipt.transaction_id,
                order.status()
            );
            order.flag_for_review(reason.clone(), now);
            tx.save_order(&order).await?;
            return Ok(Settlement::Reconcile {
                order,
                reason,
                details: Vec::new(),
            });
        }

        let reason = format!("commit for order {order_id}");
        match ledger::commit_reductions(tx, &stock_lines(&order), &reason).await? {
            CommitOutcome::Committed => {
                order.mark_paid(now)?;
                tx.save_order(&order).await?;
                Ok(Settlement::Paid(order))
            }
            CommitOutcome::Insufficient(shortfalls) => {
                let reason = format!(
                    "payment {} captured but stock could not be committed",
                    receipt.transaction_id
                );
                order.mark_paid(now)?;
                order.flag_for_review(reason.clone(), now);
                tx.save_order(&order).await?;
                Ok(Settlement::Reconcile {
                    order,
                    reason,
                    details: shortfalls.iter().map(ToString::to_string).collect(),
                })
            }
        }
    }

    /// `Paid -> Confirmed`.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_order(&self, order_id: OrderId) -> OrderOutcome {
        match self.try_confirm(order_id).await {
            Ok(order) => {
                tracing::info!(%order_id, "order confirmed");
                OrderOutcome::succeeded(&order, "Order confirmed")
            }
            Err(err) => failed(Some(order_id), "confirm order", err),
        }
    }

    async fn try_confirm(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let result = self.confirm_in(&mut tx, order_id).await;
        finish(tx, result).await
    }

    /// Refuses an order flagged for review: its stock may never have been
    /// committed.
    async fn confirm_in(&self, tx: &mut S::Tx, order_id: OrderId) -> Result<Order> {
        let mut order = lock_order(tx, order_id).await?;
        if !order.status().can_confirm() {
            return Err(OrchestratorError::InvalidStateTransition {
                current: order.status(),
                requested: OrderStatus::Confirmed,
            });
        }
        if order.requires_review() {
            return Err(flagged(&order));
        }
        order.confirm(self.clock.now())?;
        tx.save_order(&order).await?;
        Ok(order)
    }

    /// Cancels a `Pending` or `Confirmed` order owned by `user_id`, returning
    /// its stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> OrderOutcome {
        match self.try_cancel(order_id, user_id, reason).await {
            Ok(order) => {
                metrics::counter!("orders_cancelled_total").increment(1);
                tracing::info!(%order_id, ?reason, "order cancelled");
                OrderOutcome::succeeded(&order, "Order cancelled successfully")
            }
            Err(err) => failed(Some(order_id), "cancel order", err),
        }
    }

    async fn try_cancel(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let result = self.cancel_in(&mut tx, order_id, user_id, reason).await;
        finish(tx, result).await
    }

    async fn cancel_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> Result<Order> {
        let mut order = lock_order(tx, order_id).await?;
        ensure_owner(&order, user_id)?;
        self.cancel_locked(tx, &mut order, reason.unwrap_or("cancelled by user"))
            .await?;
        Ok(order)
    }

    /// Cancels a `Pending` order whose payment window has passed. System
    /// initiated: no ownership check.
    ///
    /// An order that is no longer pending, or still inside its window, is left
    /// alone and reported as a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn auto_cancel_pending_order(
        &self,
        order_id: OrderId,
        timeout: std::time::Duration,
    ) -> OrderOutcome {
        match self.try_expire(order_id, timeout).await {
            Ok((order, true)) => {
                metrics::counter!("orders_expired_total").increment(1);
                tracing::info!(%order_id, "pending order expired and cancelled");
                OrderOutcome::succeeded(&order, "Order automatically cancelled due to timeout")
            }
            Ok((order, false)) if order.status() != OrderStatus::Pending => {
                OrderOutcome::unchanged(
                    &order,
                    format!("Order not PENDING. Status: {}", order.status()),
                )
            }
            Ok((order, false)) => {
                OrderOutcome::unchanged(&order, "Order is still within payment window")
            }
            Err(err) => failed(Some(order_id), "expire order", err),
        }
    }

    /// Returns the order and whether it was cancelled.
    async fn try_expire(
        &self,
        order_id: OrderId,
        timeout: std::time::Duration,
    ) -> Result<(Order, bool)> {
        let timeout = chrono::Duration::from_std(timeout).map_err(|err| {
            OrchestratorError::InvalidArgument(format!("invalid timeout: {err}"))
        })?;

        let mut tx = self.store.begin().await?;
        let result = self.expire_in(&mut tx, order_id, timeout).await;
        finish(tx, result).await
    }

    async fn expire_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        timeout: chrono::Duration,
    ) -> Result<(Order, bool)> {
        let mut order = lock_order(tx, order_id).await?;
        if !order.is_expired(timeout, self.clock.now()) {
            return Ok((order, false));
        }
        self.cancel_locked(tx, &mut order, "payment timeout").await?;
        Ok((order, true))
    }

    /// Cancels an order whose row lock is held, returning its stock to the
    /// ledger: reservations are released for a `Pending` order, committed
    /// quantities restocked for a `Confirmed` one.
    ///
    /// An order flagged for review is refused: whether its stock was ever
    /// committed is for the operator to decide.
    async fn cancel_locked(&self, tx: &mut S::Tx, order: &mut Order, reason: &str) -> Result<()> {
        if order.requires_review() {
            return Err(flagged(order));
        }
        let previous = order.cancel(self.clock.now())?;
        let lines = stock_lines(order);
        let note = format!("order {} cancelled: {reason}", order.id());
        if previous.holds_reservation() {
            ledger::release_all(tx, &lines, &note).await?;
        } else if previous == OrderStatus::Confirmed {
            ledger::restock_all(tx, &lines, &note).await?;
        }
        tx.save_order(order).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .order(order_id)
            .await
            .map_err(OrchestratorError::from)
            .and_then(|order| order.ok_or_else(|| not_found(order_id)));
        finish(tx, result).await
    }

    /// Orders owned by `user_id`, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        let result = tx.orders_for_user(user_id).await.map_err(Into::into);
        finish(tx, result).await
    }

    /// Ids of every `Pending` order, oldest first.
    pub async fn pending_order_ids(&self) -> Result<Vec<OrderId>> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .order_ids_with_status(OrderStatus::Pending)
            .await
            .map_err(Into::into);
        finish(tx, result).await
    }

    fn resolve_method(&self, name: &str) -> Result<PaymentMethod> {
        self.gateways
            .resolve(name)
            .map(|(method, _)| method)
            .map_err(invalid_method)
    }
}

async fn lock_order<T: Transaction>(tx: &mut T, order_id: OrderId) -> Result<Order> {
    tx.lock_order(order_id)
        .await?
        .ok_or_else(|| not_found(order_id))
}

fn invalid_method(err: PaymentError) -> OrchestratorError {
    OrchestratorError::InvalidArgument(err.to_string())
}

fn not_found(order_id: OrderId) -> OrchestratorError {
    OrchestratorError::NotFound(format!("order {order_id}"))
}

fn ensure_owner(order: &Order, user_id: UserId) -> Result<()> {
    if !order.is_owned_by(user_id) {
        return Err(OrchestratorError::Unauthorized {
            order_id: order.id(),
            user_id,
        });
    }
    Ok(())
}

fn flagged(order: &Order) -> OrchestratorError {
    OrchestratorError::ReconciliationRequired {
        order_id: order.id(),
        reason: format!(
            "order is flagged for review: {}",
            order.review_note().unwrap_or("no note")
        ),
    }
}

fn stock_lines(order: &Order) -> Vec<StockLine> {
    order.items().iter().map(StockLine::from).collect()
}

/// Logs an error at the level its kind deserves and turns it into an outcome.
fn failed(order_id: Option<OrderId>, operation: &str, err: OrchestratorError) -> OrderOutcome {
    match &err {
        OrchestratorError::Store(_) | OrchestratorError::ReconciliationRequired { .. } => {
            tracing::error!(?order_id, error = %err, "{operation} failed");
        }
        _ => tracing::warn!(?order_id, error = %err, "{operation} failed"),
    }
    OrderOutcome::failure(order_id, &err)
}

//! The inventory ledger: every stock counter mutation goes through here.
//!
//! Each operation locks the inventory row before reading it, applies the
//! change to the locked image, writes it back, and appends one audit entry
//! per counter that moved. Multi-row operations lock rows in ascending
//! product id order.

use common::ProductId;
use domain::{InventoryLogEntry, InventoryRecord, NewInventoryLog, Product, StockChange};
use serde::{Deserialize, Serialize};
use store::{Store, Transaction, finish};

use crate::error::{LedgerError, Result};
use crate::line::{StockLine, aggregate_lines};

/// A line whose reservation is no longer covered at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_id: ProductId,
    /// Units on hand when checked.
    pub quantity: u32,
    /// Units reserved when checked.
    pub reserved: u32,
    pub requested: u32,
}

impl StockShortfall {
    fn of(record: &InventoryRecord, requested: u32) -> Self {
        Self {
            product_id: record.product_id(),
            quantity: record.quantity(),
            reserved: record.reserved_quantity(),
            requested,
        }
    }
}

impl std::fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "product {}: requested {}, reserved {}, on hand {}",
            self.product_id, self.requested, self.reserved, self.quantity
        )
    }
}

/// Result of committing reserved stock as sold.
///
/// A refused commit is not an error: stock drifted after the reservation was
/// taken, and the caller decides how to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum CommitOutcome {
    /// Both counters were reduced for every line.
    Committed,
    /// Nothing was written.
    Insufficient(Vec<StockShortfall>),
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}

async fn lock<T: Transaction>(tx: &mut T, product_id: ProductId) -> Result<InventoryRecord> {
    tx.lock_inventory(product_id)
        .await?
        .ok_or(LedgerError::NotFound(product_id))
}

async fn write<T: Transaction>(
    tx: &mut T,
    record: &InventoryRecord,
    changes: &[StockChange],
    reason: &str,
) -> Result<()> {
    if changes.iter().all(StockChange::is_noop) {
        return Ok(());
    }
    tx.save_inventory(record).await?;
    for change in changes.iter().filter(|change| !change.is_noop()) {
        tx.append_inventory_log(&NewInventoryLog::from_change(record.id(), *change, reason))
            .await?;
    }
    Ok(())
}

fn require_positive(product_id: ProductId, quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(LedgerError::InvalidArgument(format!(
            "quantity for product {product_id} must be greater than 0"
        )));
    }
    Ok(())
}

/// Creates a product with its inventory row, recording any opening stock.
pub async fn create_product<T: Transaction>(
    tx: &mut T,
    product: &Product,
    initial_stock: u32,
) -> Result<InventoryRecord> {
    product
        .validate()
        .map_err(|e| LedgerError::InvalidArgument(e.to_string()))?;
    let record = tx.insert_product(product, 0).await?;
    if initial_stock == 0 {
        return Ok(record);
    }
    restock(tx, product.id, initial_stock, "initial stock").await
}

/// Earmarks `quantity` units for a pending order.
///
/// Fails with `InsufficientStock` when fewer than `quantity` units are
/// available under the lock.
pub async fn reserve<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
    reason: &str,
) -> Result<InventoryRecord> {
    let mut record = lock(tx, product_id).await?;
    let change = match record.reserve(quantity) {
        Ok(change) => change,
        Err(err) => {
            metrics::counter!("stock_reservation_conflicts_total").increment(1);
            tracing::debug!(
                %product_id,
                quantity,
                available = record.available(),
                "reservation refused"
            );
            return Err(err.into());
        }
    };
    write(tx, &record, &[change], reason).await?;
    metrics::counter!("stock_reservations_total").increment(1);
    Ok(record)
}

/// Reserves every line, or fails on the first one that cannot be reserved.
///
/// Earlier lines are not undone here; the caller rolls back the transaction.
pub async fn reserve_all<T: Transaction>(
    tx: &mut T,
    lines: &[StockLine],
    reason: &str,
) -> Result<Vec<InventoryRecord>> {
    let totals = aggregate_lines(lines)?;
    let mut records = Vec::with_capacity(totals.len());
    for (&product_id, &quantity) in &totals {
        records.push(reserve(tx, product_id, quantity, reason).await?);
    }
    Ok(records)
}

/// Drops up to `quantity` units of reservation. Over-release clamps at zero.
pub async fn release<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
    reason: &str,
) -> Result<InventoryRecord> {
    require_positive(product_id, quantity)?;
    let mut record = lock(tx, product_id).await?;
    let change = record.release(quantity);
    if change.delta() != -i64::from(quantity) {
        tracing::warn!(
            %product_id,
            requested = quantity,
            released = change.before - change.after,
            "release clamped"
        );
    }
    write(tx, &record, &[change], reason).await?;
    Ok(record)
}

pub async fn release_all<T: Transaction>(
    tx: &mut T,
    lines: &[StockLine],
    reason: &str,
) -> Result<()> {
    for (product_id, quantity) in aggregate_lines(lines)? {
        release(tx, product_id, quantity, reason).await?;
    }
    Ok(())
}

/// Converts `quantity` reserved units of one product into a sale.
pub async fn commit_reduction<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
    reason: &str,
) -> Result<CommitOutcome> {
    commit_reductions(tx, &[StockLine::new(product_id, quantity)], reason).await
}

/// Converts the reservations of every line into a sale, all or nothing.
///
/// All rows are locked and checked before any is written: each line needs
/// its reservation still held and still backed by stock on hand.
pub async fn commit_reductions<T: Transaction>(
    tx: &mut T,
    lines: &[StockLine],
    reason: &str,
) -> Result<CommitOutcome> {
    let totals = aggregate_lines(lines)?;

    let mut locked = Vec::with_capacity(totals.len());
    let mut shortfalls = Vec::new();
    for (&product_id, &quantity) in &totals {
        let record = lock(tx, product_id).await?;
        if record.check_commit(quantity).is_err() {
            shortfalls.push(StockShortfall::of(&record, quantity));
        }
        locked.push((record, quantity));
    }

    if !shortfalls.is_empty() {
        tracing::warn!(?shortfalls, "stock commit refused");
        return Ok(CommitOutcome::Insufficient(shortfalls));
    }

    for (mut record, quantity) in locked {
        let changes = record.commit_reduction(quantity)?;
        write(tx, &record, &changes, reason).await?;
    }
    Ok(CommitOutcome::Committed)
}

/// Adds `quantity` units of physical stock.
pub async fn restock<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
    reason: &str,
) -> Result<InventoryRecord> {
    require_positive(product_id, quantity)?;
    let mut record = lock(tx, product_id).await?;
    let change = record.restock(quantity)?;
    write(tx, &record, &[change], reason).await?;
    Ok(record)
}

pub async fn restock_all<T: Transaction>(
    tx: &mut T,
    lines: &[StockLine],
    reason: &str,
) -> Result<()> {
    for (product_id, quantity) in aggregate_lines(lines)? {
        restock(tx, product_id, quantity, reason).await?;
    }
    Ok(())
}

/// Overwrites on-hand stock after a stock take. Never below what is reserved.
pub async fn set_stock<T: Transaction>(
    tx: &mut T,
    product_id: ProductId,
    quantity: u32,
    reason: &str,
) -> Result<InventoryRecord> {
    let mut record = lock(tx, product_id).await?;
    let change = record.set_quantity(quantity)?;
    write(tx, &record, &[change], reason).await?;
    Ok(record)
}

/// Ledger service running each operation in its own transaction.
///
/// Use the free functions in this module to combine stock movements with
/// other writes in one transaction.
#[derive(Clone)]
pub struct InventoryLedger<S: Store> {
    store: S,
}

impl<S: Store> InventoryLedger<S> {
    /// Creates a new ledger over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds a product to the catalog with `initial_stock` on hand.
    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn create_product(
        &self,
        product: &Product,
        initial_stock: u32,
    ) -> Result<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let result = create_product(&mut tx, product, initial_stock).await;
        finish(tx, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let result = reserve(&mut tx, product_id, quantity, "reserve").await;
        finish(tx, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, product_id: ProductId, quantity: u32) -> Result<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let result = release(&mut tx, product_id, quantity, "release").await;
        finish(tx, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn commit_reduction(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CommitOutcome> {
        let mut tx = self.store.begin().await?;
        let result = commit_reduction(&mut tx, product_id, quantity, "commit reduction").await;
        finish(tx, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, product_id: ProductId, quantity: u32) -> Result<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let result = restock(&mut tx, product_id, quantity, "restock").await;
        finish(tx, result).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_stock(&self, product_id: ProductId, quantity: u32) -> Result<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let result = set_stock(&mut tx, product_id, quantity, "stock adjustment").await;
        finish(tx, result).await
    }

    /// Current committed counters of a product.
    pub async fn snapshot(&self, product_id: ProductId) -> Result<InventoryRecord> {
        let mut tx = self.store.begin().await?;
        let mut rows = tx.inventories(&[product_id]).await?;
        tx.rollback().await?;
        rows.pop().ok_or(LedgerError::NotFound(product_id))
    }

    /// Audit trail of a product, oldest first.
    pub async fn log(&self, product_id: ProductId) -> Result<Vec<InventoryLogEntry>> {
        let mut tx = self.store.begin().await?;
        let entries = tx.inventory_log(product_id).await?;
        tx.rollback().await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use domain::StockCounter;
    use store::InMemoryStore;

    fn product(id: i64) -> Product {
        Product::new(
            ProductId::new(id),
            format!("SKU-{id:03}"),
            format!("Product {id}"),
            Money::from_cents(500),
        )
        .unwrap()
    }

    async fn ledger_with(stock: &[(i64, u32)]) -> InventoryLedger<InMemoryStore> {
        let ledger = InventoryLedger::new(InMemoryStore::new());
        for (id, quantity) in stock {
            ledger.create_product(&product(*id), *quantity).await.unwrap();
        }
        ledger
    }

    fn pid(id: i64) -> ProductId {
        ProductId::new(id)
    }

    #[tokio::test]
    async fn create_product_logs_opening_stock() {
        let ledger = ledger_with(&[(1, 10)]).await;

        let log = ledger.log(pid(1)).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].counter, StockCounter::Quantity);
        assert_eq!((log[0].before, log[0].after), (0, 10));
        assert_eq!(log[0].reason, "initial stock");
    }

    #[tokio::test]
    async fn reserve_within_and_beyond_capacity() {
        let ledger = ledger_with(&[(1, 10)]).await;

        ledger.reserve(pid(1), 4).await.unwrap();
        ledger.reserve(pid(1), 4).await.unwrap();
        let err = ledger.reserve(pid(1), 4).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                available: 2,
                requested: 4,
                ..
            }
        ));

        let snapshot = ledger.snapshot(pid(1)).await.unwrap();
        assert_eq!(snapshot.reserved_quantity(), 8);
        assert_eq!(snapshot.quantity(), 10);
    }

    #[tokio::test]
    async fn reserve_unknown_product_is_not_found() {
        let ledger = ledger_with(&[]).await;
        let err = ledger.reserve(pid(42), 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(id) if id == pid(42)));
    }

    #[tokio::test]
    async fn release_clamps_and_skips_empty_log_entries() {
        let ledger = ledger_with(&[(1, 10)]).await;
        ledger.reserve(pid(1), 3).await.unwrap();

        let record = ledger.release(pid(1), 5).await.unwrap();
        assert_eq!(record.reserved_quantity(), 0);

        // Releasing from zero is a no-op and writes nothing.
        ledger.release(pid(1), 1).await.unwrap();
        let log = ledger.log(pid(1)).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].change, -3);
    }

    #[tokio::test]
    async fn commit_reduction_consumes_reservation() {
        let ledger = ledger_with(&[(1, 10)]).await;
        ledger.reserve(pid(1), 4).await.unwrap();

        let outcome = ledger.commit_reduction(pid(1), 4).await.unwrap();
        assert!(outcome.is_committed());

        let snapshot = ledger.snapshot(pid(1)).await.unwrap();
        assert_eq!(snapshot.quantity(), 6);
        assert_eq!(snapshot.reserved_quantity(), 0);

        let log = ledger.log(pid(1)).await.unwrap();
        assert!(log.iter().all(InventoryLogEntry::is_consistent));
    }

    #[tokio::test]
    async fn commit_without_reservation_is_refused_not_error() {
        let ledger = ledger_with(&[(1, 10)]).await;

        let outcome = ledger.commit_reduction(pid(1), 4).await.unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Insufficient(vec![StockShortfall {
                product_id: pid(1),
                quantity: 10,
                reserved: 0,
                requested: 4,
            }])
        );
        assert_eq!(ledger.snapshot(pid(1)).await.unwrap().quantity(), 10);
    }

    #[tokio::test]
    async fn commit_reductions_is_all_or_nothing() {
        let ledger = ledger_with(&[(1, 10), (2, 10)]).await;
        ledger.reserve(pid(1), 2).await.unwrap();
        ledger.reserve(pid(2), 1).await.unwrap();

        let mut tx = ledger.store().begin().await.unwrap();
        let lines = [StockLine::new(pid(1), 2), StockLine::new(pid(2), 3)];
        let outcome = commit_reductions(&mut tx, &lines, "sale").await.unwrap();
        tx.commit().await.unwrap();

        assert!(!outcome.is_committed());
        assert_eq!(ledger.snapshot(pid(1)).await.unwrap().quantity(), 10);
        assert_eq!(ledger.snapshot(pid(1)).await.unwrap().reserved_quantity(), 2);
    }

    #[tokio::test]
    async fn restock_rejects_zero() {
        let ledger = ledger_with(&[(1, 0)]).await;
        assert!(matches!(
            ledger.restock(pid(1), 0).await,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(ledger.restock(pid(1), 7).await.unwrap().quantity(), 7);
    }

    #[tokio::test]
    async fn set_stock_respects_reservations() {
        let ledger = ledger_with(&[(1, 10)]).await;
        ledger.reserve(pid(1), 6).await.unwrap();

        assert!(matches!(
            ledger.set_stock(pid(1), 5).await,
            Err(LedgerError::InvalidArgument(_))
        ));
        let record = ledger.set_stock(pid(1), 8).await.unwrap();
        assert_eq!(record.available(), 2);
    }

    #[tokio::test]
    async fn reserve_all_failure_leaves_nothing_after_rollback() {
        let ledger = ledger_with(&[(1, 10), (2, 1)]).await;

        let mut tx = ledger.store().begin().await.unwrap();
        let lines = [StockLine::new(pid(1), 5), StockLine::new(pid(2), 2)];
        let result = reserve_all(&mut tx, &lines, "order").await;
        assert!(result.is_err());
        finish(tx, result).await.unwrap_err();

        assert_eq!(ledger.snapshot(pid(1)).await.unwrap().reserved_quantity(), 0);
        assert_eq!(ledger.snapshot(pid(2)).await.unwrap().reserved_quantity(), 0);
    }

    #[tokio::test]
    async fn invalid_product_is_rejected() {
        let ledger = ledger_with(&[]).await;
        let mut bad = product(1);
        bad.price = Money::zero();
        assert!(matches!(
            ledger.create_product(&bad, 1).await,
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}

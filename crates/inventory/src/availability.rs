//! Unlocked stock availability checks.
//!
//! These reads take no row locks and may be stale by the time a locked ledger
//! operation runs. They exist to fail fast with a useful report, never to
//! guarantee the later mutation succeeds.

use std::collections::HashMap;

use common::ProductId;
use serde::{Deserialize, Serialize};
use store::{Store, Transaction};

use crate::error::{LedgerError, Result};
use crate::ledger::StockShortfall;
use crate::line::{StockLine, aggregate_lines};

/// Availability verdict for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available { available: u32 },
    NotFound,
    Insufficient { available: u32 },
}

/// Requested quantity of one product and whether it can be met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub product_id: ProductId,
    pub requested: u32,
    #[serde(flatten)]
    pub status: AvailabilityStatus,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self.status, AvailabilityStatus::Available { .. })
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            AvailabilityStatus::Available { available } => write!(
                f,
                "product {}: requested {}, available {}",
                self.product_id, self.requested, available
            ),
            AvailabilityStatus::NotFound => write!(f, "product {}: not found", self.product_id),
            AvailabilityStatus::Insufficient { available } => write!(
                f,
                "product {}: insufficient stock (requested {}, available {})",
                self.product_id, self.requested, available
            ),
        }
    }
}

/// One entry per distinct product, in ascending product id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub items: Vec<Availability>,
}

impl AvailabilityReport {
    pub fn all_available(&self) -> bool {
        self.items.iter().all(Availability::is_available)
    }

    /// Entries that cannot be met.
    pub fn issues(&self) -> impl Iterator<Item = &Availability> {
        self.items.iter().filter(|item| !item.is_available())
    }

    /// Human-readable lines for every issue.
    pub fn details(&self) -> Vec<String> {
        self.issues().map(ToString::to_string).collect()
    }
}

/// Checks in one round trip whether every requested quantity is available.
///
/// Duplicate product lines are summed first, so a cart asking for the same
/// product twice is judged on its total demand.
pub async fn bulk_check_availability<T: Transaction>(
    tx: &mut T,
    lines: &[StockLine],
) -> Result<AvailabilityReport> {
    let totals = aggregate_lines(lines)?;
    let ids: Vec<ProductId> = totals.keys().copied().collect();
    let rows: HashMap<ProductId, u32> = tx
        .inventories(&ids)
        .await?
        .into_iter()
        .map(|record| (record.product_id(), record.available()))
        .collect();

    let items = totals
        .into_iter()
        .map(|(product_id, requested)| {
            let status = match rows.get(&product_id) {
                None => AvailabilityStatus::NotFound,
                Some(&available) if available >= requested => {
                    AvailabilityStatus::Available { available }
                }
                Some(&available) => AvailabilityStatus::Insufficient { available },
            };
            Availability {
                product_id,
                requested,
                status,
            }
        })
        .collect();

    Ok(AvailabilityReport { items })
}

/// Verifies that reservations for `lines` are still held and still backed by
/// stock on hand.
///
/// Used before charging a pending order: its own reservation already counts
/// against availability, so the question is whether it can still be committed.
pub async fn check_reservations<T: Transaction>(
    tx: &mut T,
    lines: &[StockLine],
) -> Result<Vec<StockShortfall>> {
    let totals = aggregate_lines(lines)?;
    let ids: Vec<ProductId> = totals.keys().copied().collect();
    let rows: HashMap<_, _> = tx
        .inventories(&ids)
        .await?
        .into_iter()
        .map(|record| (record.product_id(), record))
        .collect();

    let mut shortfalls = Vec::new();
    for (product_id, requested) in totals {
        let record = rows
            .get(&product_id)
            .ok_or(LedgerError::NotFound(product_id))?;
        if record.check_commit(requested).is_err() {
            shortfalls.push(StockShortfall {
                product_id,
                quantity: record.quantity(),
                reserved: record.reserved_quantity(),
                requested,
            });
        }
    }
    Ok(shortfalls)
}

/// Read-only availability service.
#[derive(Clone)]
pub struct AvailabilityChecker<S: Store> {
    store: S,
}

impl<S: Store> AvailabilityChecker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn bulk_check_availability(&self, lines: &[StockLine]) -> Result<AvailabilityReport> {
        let mut tx = self.store.begin().await?;
        let report = bulk_check_availability(&mut tx, lines).await;
        tx.rollback().await?;
        report
    }

    /// Returns true if `quantity` units of a product are available right now.
    pub async fn is_available(&self, product_id: ProductId, quantity: u32) -> Result<bool> {
        let report = self
            .bulk_check_availability(&[StockLine::new(product_id, quantity)])
            .await?;
        Ok(report.all_available())
    }
}

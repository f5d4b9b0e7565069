//! Append-only inventory audit trail.

use chrono::{DateTime, Utc};
use common::InventoryId;
use serde::{Deserialize, Serialize};

use crate::inventory::{StockChange, StockCounter};

/// A stock movement to be appended to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInventoryLog {
    pub inventory_id: InventoryId,
    pub counter: StockCounter,
    pub change: i64,
    pub before: u32,
    pub after: u32,
    pub reason: String,
}

impl NewInventoryLog {
    pub fn from_change(
        inventory_id: InventoryId,
        change: StockChange,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            inventory_id,
            counter: change.counter,
            change: change.delta(),
            before: change.before,
            after: change.after,
            reason: reason.into(),
        }
    }

    /// `before + change == after`; the ledger never writes an entry that breaks this.
    pub fn is_consistent(&self) -> bool {
        i64::from(self.before) + self.change == i64::from(self.after)
    }
}

/// A persisted audit row. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLogEntry {
    pub id: i64,
    pub inventory_id: InventoryId,
    pub counter: StockCounter,
    pub change: i64,
    pub before: u32,
    pub after: u32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl InventoryLogEntry {
    pub fn is_consistent(&self) -> bool {
        i64::from(self.before) + self.change == i64::from(self.after)
    }
}

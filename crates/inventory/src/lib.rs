//! Inventory ledger and stock availability checks.
//!
//! The ledger is the only writer of inventory counters. Its operations come
//! in two forms:
//! - free functions in [`ledger`] that run inside a caller's transaction, so
//!   an orchestrator can combine stock movements with order writes atomically
//! - [`InventoryLedger`], which wraps each operation in its own transaction
//!
//! [`availability`] holds the unlocked pre-checks. They may be stale by the
//! time a locked operation runs and are never authoritative.

pub mod availability;
pub mod error;
pub mod ledger;
pub mod line;

pub use availability::{
    Availability, AvailabilityChecker, AvailabilityReport, AvailabilityStatus,
    bulk_check_availability, check_reservations,
};
pub use error::{LedgerError, Result};
pub use ledger::{CommitOutcome, InventoryLedger, StockShortfall};
pub use line::{StockLine, aggregate_lines};

//! Data store seam for the order/inventory core.
//!
//! The core needs exactly two things from persistence: transactions with
//! commit/rollback, and exclusive per-row locks ("select for update") on
//! inventory and order rows. `Store` and `Transaction` describe that
//! contract; `InMemoryStore` and `PostgresStore` implement it.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use store::{Store, Transaction, finish};

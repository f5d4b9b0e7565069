//! Domain layer for the order/inventory core.
//!
//! This crate holds the pure model, free of I/O:
//! - `InventoryRecord` with the `0 <= reserved <= quantity` invariant
//! - the append-only inventory audit entries
//! - the `Order` aggregate and its `OrderStatus` state machine
//! - catalog `Product` identity and price

pub mod error;
pub mod inventory;
pub mod log;
pub mod order;
pub mod product;

pub use common::{InventoryId, Money, OrderId, ProductId, UserId};
pub use error::{InventoryError, ProductError};
pub use inventory::{InventoryRecord, StockChange, StockCounter};
pub use log::{InventoryLogEntry, NewInventoryLog};
pub use order::{Order, OrderError, OrderHeader, OrderItem, OrderStatus};
pub use product::Product;

//! Shared identifiers and value types used across the order/inventory core.

pub mod ids;
pub mod money;

pub use ids::{InventoryId, OrderId, ProductId, UserId};
pub use money::Money;

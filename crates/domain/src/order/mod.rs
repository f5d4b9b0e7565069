//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderHeader};
pub use state::OrderStatus;
pub use value_objects::OrderItem;

use common::ProductId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// User ID is required.
    #[error("User ID is required")]
    UserIdRequired,

    /// Order is not in a status that allows the requested one.
    #[error("Invalid state transition: cannot move from {current} to {requested}")]
    InvalidStateTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    /// Invalid quantity.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for product {product_id}: {price} (must be greater than 0)")]
    InvalidPrice { product_id: ProductId, price: i64 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Line or order total does not fit in the money range.
    #[error("Order total is too large")]
    TotalOverflow,
}

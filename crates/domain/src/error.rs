//! Domain error types.

use common::ProductId;
use thiserror::Error;

/// Errors raised by inventory counter mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Quantities passed to reserve/commit/restock must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Requested quantity exceeds `quantity - reserved_quantity`.
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// A commit would consume more than is reserved or physically on hand.
    #[error(
        "Reservation for product {product_id} no longer covers {requested}: reserved {reserved}, on hand {quantity}"
    )]
    UnbackedReservation {
        product_id: ProductId,
        quantity: u32,
        reserved: u32,
        requested: u32,
    },

    /// A stock adjustment would drop on-hand stock below what is reserved.
    #[error("Cannot set stock of product {product_id} to {requested}: {reserved} units are reserved")]
    BelowReserved {
        product_id: ProductId,
        reserved: u32,
        requested: u32,
    },

    /// Counters are stored as 32-bit values.
    #[error("Stock counter overflow for product {product_id}")]
    Overflow { product_id: ProductId },

    /// A persisted row violated `0 <= reserved <= quantity`.
    #[error("Corrupt inventory row for product {product_id}: reserved {reserved} exceeds quantity {quantity}")]
    Corrupt {
        product_id: ProductId,
        quantity: u32,
        reserved: u32,
    },
}

/// Errors raised when validating a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("Invalid price: {cents} cents (must be greater than 0)")]
    InvalidPrice { cents: i64 },

    #[error("SKU must be at least 3 characters")]
    InvalidSku,

    #[error("Product name is required")]
    MissingName,
}

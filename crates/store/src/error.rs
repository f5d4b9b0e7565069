use common::{OrderId, ProductId};
use domain::InventoryError;
use thiserror::Error;

/// Errors that can occur when interacting with the data store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write was attempted on a row the transaction has not locked.
    #[error("Row lock not held: {0}")]
    LockNotHeld(String),

    /// The order row already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The product row already exists.
    #[error("Product already exists: {0}")]
    DuplicateProduct(ProductId),

    /// Another product already uses this SKU.
    #[error("SKU already in use: {0}")]
    DuplicateSku(String),

    /// A stored row could not be mapped back to the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A stored inventory row violates its counter invariant.
    #[error("Inventory invariant violated: {0}")]
    Inventory(#[from] InventoryError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

//! Ledger error types.

use common::ProductId;
use domain::InventoryError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No inventory row exists for the product.
    #[error("Inventory not found for product {0}")]
    NotFound(ProductId),

    /// Requested quantity exceeds available stock at lock time.
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// Non-positive quantity, stock below reservations, counter overflow.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Data store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<InventoryError> for LedgerError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock {
                product_id,
                available,
                requested,
            } => LedgerError::InsufficientStock {
                product_id,
                available,
                requested,
            },
            InventoryError::Corrupt { .. } => LedgerError::Store(StoreError::Inventory(err)),
            other => LedgerError::InvalidArgument(other.to_string()),
        }
    }
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, LedgerError>;

//! Orchestrator error types.

use common::{OrderId, UserId};
use domain::{OrderError, OrderStatus};
use inventory::LedgerError;
use serde::{Deserialize, Serialize};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during order workflows.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A referenced product, inventory row or order does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Requested quantity exceeds available stock.
    #[error("Insufficient stock")]
    InsufficientStock { details: Vec<String> },

    /// Non-positive quantity or price, empty cart, missing identifiers,
    /// unknown payment method.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on an order in an incompatible status.
    #[error("Invalid state transition: cannot move from {current} to {requested}")]
    InvalidStateTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    /// Actor is not the order's owner.
    #[error("User {user_id} does not own order {order_id}")]
    Unauthorized { order_id: OrderId, user_id: UserId },

    /// Gateway reported failure after exhausting retries.
    #[error("Payment failed after {attempts} attempt(s): {message}")]
    PaymentFailed { attempts: u32, message: String },

    /// Payment was captured but the order could not be settled normally.
    #[error("Order {order_id} requires manual reconciliation: {reason}")]
    ReconciliationRequired { order_id: OrderId, reason: String },

    /// Data store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Stable, serializable classification of an [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InsufficientStock,
    InvalidArgument,
    InvalidStateTransition,
    Unauthorized,
    PaymentFailed,
    ReconciliationRequired,
    Internal,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            OrchestratorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            OrchestratorError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            OrchestratorError::Unauthorized { .. } => ErrorKind::Unauthorized,
            OrchestratorError::PaymentFailed { .. } => ErrorKind::PaymentFailed,
            OrchestratorError::ReconciliationRequired { .. } => ErrorKind::ReconciliationRequired,
            OrchestratorError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Per-item detail lines for the caller, if any.
    pub fn details(&self) -> Vec<String> {
        match self {
            OrchestratorError::InsufficientStock { details } => details.clone(),
            OrchestratorError::PaymentFailed { message, .. } => vec![message.clone()],
            _ => Vec::new(),
        }
    }
}

impl From<LedgerError> for OrchestratorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(product_id) => {
                OrchestratorError::NotFound(format!("inventory for product {product_id}"))
            }
            LedgerError::InsufficientStock { .. } => OrchestratorError::InsufficientStock {
                details: vec![err.to_string()],
            },
            LedgerError::InvalidArgument(message) => OrchestratorError::InvalidArgument(message),
            LedgerError::Store(err) => OrchestratorError::Store(err),
        }
    }
}

impl From<OrderError> for OrchestratorError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidStateTransition { current, requested } => {
                OrchestratorError::InvalidStateTransition { current, requested }
            }
            other => OrchestratorError::InvalidArgument(other.to_string()),
        }
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

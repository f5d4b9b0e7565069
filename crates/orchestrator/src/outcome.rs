//! Caller-facing results of order workflows.

use common::{Money, OrderId};
use domain::{Order, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, OrchestratorError};
use crate::payment::{PaymentMethod, PaymentResponse, PaymentStatus};

/// What the gateway reported for a captured payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub method: PaymentMethod,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub message: String,
    pub attempts: u32,
}

impl PaymentReceipt {
    pub(crate) fn new(method: PaymentMethod, response: PaymentResponse, attempts: u32) -> Self {
        Self {
            method,
            transaction_id: response.transaction_id,
            status: response.status,
            message: response.message,
            attempts,
        }
    }
}

/// Structured result of a placement, payment, confirmation or cancellation.
///
/// `success == false` with no `error` means the call was a deliberate no-op
/// (e.g. an expiry check on an order still inside its payment window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(default)]
    pub requires_manual_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentReceipt>,
}

impl OrderOutcome {
    fn for_order(success: bool, order: &Order, message: impl Into<String>) -> Self {
        Self {
            success,
            order_id: Some(order.id()),
            total: Some(order.total_amount()),
            status: Some(order.status()),
            message: message.into(),
            error: None,
            details: Vec::new(),
            requires_manual_review: order.requires_review(),
            payment: None,
        }
    }

    pub(crate) fn succeeded(order: &Order, message: impl Into<String>) -> Self {
        Self::for_order(true, order, message)
    }

    /// Nothing changed, and nothing went wrong.
    pub(crate) fn unchanged(order: &Order, message: impl Into<String>) -> Self {
        Self::for_order(false, order, message)
    }

    /// Placement refused for stock; the `Failed` audit order was recorded.
    pub(crate) fn rejected(order: &Order, details: Vec<String>) -> Self {
        Self {
            error: Some(ErrorKind::InsufficientStock),
            details,
            ..Self::for_order(false, order, "Insufficient stock")
        }
    }

    /// Payment captured but settlement needs an operator.
    pub(crate) fn reconciliation(
        order: &Order,
        receipt: PaymentReceipt,
        message: impl Into<String>,
        details: Vec<String>,
    ) -> Self {
        Self {
            error: Some(ErrorKind::ReconciliationRequired),
            details,
            requires_manual_review: true,
            payment: Some(receipt),
            ..Self::for_order(false, order, message)
        }
    }

    pub(crate) fn failure(order_id: Option<OrderId>, err: &OrchestratorError) -> Self {
        Self {
            success: false,
            order_id,
            total: None,
            status: None,
            message: err.to_string(),
            error: Some(err.kind()),
            details: err.details(),
            requires_manual_review: err.kind() == ErrorKind::ReconciliationRequired,
            payment: None,
        }
    }

    pub(crate) fn with_payment(mut self, receipt: PaymentReceipt) -> Self {
        self.payment = Some(receipt);
        self
    }

    /// True when the outcome must be surfaced to an operator.
    pub fn needs_reconciliation(&self) -> bool {
        self.error == Some(ErrorKind::ReconciliationRequired)
    }
}

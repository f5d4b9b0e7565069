//! Order aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::{Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderItem, OrderStatus};

/// Header columns of an order row.
///
/// Split from the items so a store can persist a status change without
/// rewriting the lines, which are immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_amount: Money,
    /// Set when payment and stock disagree and an operator must reconcile.
    pub requires_review: bool,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order aggregate root.
///
/// Represents one purchase attempt from placement through payment to
/// confirmation, or to failure/cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    header: OrderHeader,
    items: Vec<OrderItem>,
}

// Construction
impl Order {
    /// Creates a `Pending` order whose total is the sum of its lines.
    pub fn pending(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if !user_id.is_valid() {
            return Err(OrderError::UserIdRequired);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price.cents(),
                });
            }
        }

        let total_amount = items
            .iter()
            .map(OrderItem::total_price)
            .collect::<Option<Vec<_>>>()
            .and_then(Money::checked_sum)
            .ok_or(OrderError::TotalOverflow)?;
        Ok(Self {
            header: OrderHeader {
                id,
                user_id,
                status: OrderStatus::Pending,
                total_amount,
                requires_review: false,
                review_note: None,
                created_at: now,
                updated_at: now,
            },
            items,
        })
    }

    /// Creates a `Failed` order recording a placement attempt that could not
    /// be satisfied. It carries no lines and a zero total.
    pub fn failed(id: OrderId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            header: OrderHeader {
                id,
                user_id,
                status: OrderStatus::Failed,
                total_amount: Money::zero(),
                requires_review: false,
                review_note: None,
                created_at: now,
                updated_at: now,
            },
            items: Vec::new(),
        }
    }

    /// Reassembles an order loaded from storage.
    pub fn from_parts(header: OrderHeader, items: Vec<OrderItem>) -> Self {
        Self { header, items }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.header.id
    }

    pub fn user_id(&self) -> UserId {
        self.header.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.header.status
    }

    pub fn total_amount(&self) -> Money {
        self.header.total_amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.header.updated_at
    }

    pub fn requires_review(&self) -> bool {
        self.header.requires_review
    }

    pub fn review_note(&self) -> Option<&str> {
        self.header.review_note.as_deref()
    }

    pub fn header(&self) -> &OrderHeader {
        &self.header
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true if the owner matches.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.header.user_id == user_id
    }

    /// Returns true once a `Pending` order has outlived its payment window.
    ///
    /// The window is exclusive: an order exactly `timeout` old is not expired.
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.header.status == OrderStatus::Pending && now - self.header.created_at > timeout
    }
}

// Transitions
impl Order {
    /// Moves the order to `next`, enforcing the transition table.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.header.status.can_transition_to(next) {
            return Err(OrderError::InvalidStateTransition {
                current: self.header.status,
                requested: next,
            });
        }
        self.header.status = next;
        self.header.updated_at = now;
        Ok(())
    }

    /// `Pending -> Paid`.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Paid, now)
    }

    /// `Paid -> Confirmed`.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Confirmed, now)
    }

    /// `Pending | Confirmed -> Cancelled`. Returns the status cancelled from,
    /// which decides whether stock is released or restocked.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<OrderStatus, OrderError> {
        let previous = self.header.status;
        self.transition(OrderStatus::Cancelled, now)?;
        Ok(previous)
    }

    /// Flags the order for manual reconciliation. Does not change status.
    pub fn flag_for_review(&mut self, note: impl Into<String>, now: DateTime<Utc>) {
        self.header.requires_review = true;
        self.header.review_note = Some(note.into());
        self.header.updated_at = now;
    }
}

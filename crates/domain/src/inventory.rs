//! Per-product stock counters.
//!
//! An `InventoryRecord` is the in-memory image of one locked inventory row.
//! Every mutation checks the counter invariant and reports the exact
//! before/after values so the ledger can write an audit entry for it.

use common::{InventoryId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Which counter of an inventory row a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockCounter {
    /// Physical stock on hand.
    Quantity,
    /// Portion of on-hand stock earmarked for pending orders.
    Reserved,
}

impl StockCounter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockCounter::Quantity => "quantity",
            StockCounter::Reserved => "reserved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quantity" => Some(StockCounter::Quantity),
            "reserved" => Some(StockCounter::Reserved),
            _ => None,
        }
    }
}

impl std::fmt::Display for StockCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single counter movement, recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub counter: StockCounter,
    pub before: u32,
    pub after: u32,
}

impl StockChange {
    fn new(counter: StockCounter, before: u32, after: u32) -> Self {
        Self {
            counter,
            before,
            after,
        }
    }

    /// Signed delta applied to the counter.
    pub fn delta(&self) -> i64 {
        i64::from(self.after) - i64::from(self.before)
    }

    /// True when the counter did not move (e.g. releasing from zero).
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// Stock counters for one product.
///
/// Invariant: `reserved_quantity <= quantity`. Only `available()` units may
/// be promised to a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    id: InventoryId,
    product_id: ProductId,
    quantity: u32,
    reserved_quantity: u32,
}

impl InventoryRecord {
    /// Builds a record from stored counters, rejecting rows that break the invariant.
    pub fn new(
        id: InventoryId,
        product_id: ProductId,
        quantity: u32,
        reserved_quantity: u32,
    ) -> Result<Self, InventoryError> {
        if reserved_quantity > quantity {
            return Err(InventoryError::Corrupt {
                product_id,
                quantity,
                reserved: reserved_quantity,
            });
        }
        Ok(Self {
            id,
            product_id,
            quantity,
            reserved_quantity,
        })
    }

    /// A fresh row created alongside its product.
    pub fn empty(id: InventoryId, product_id: ProductId) -> Self {
        Self {
            id,
            product_id,
            quantity: 0,
            reserved_quantity: 0,
        }
    }

    pub fn id(&self) -> InventoryId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> u32 {
        self.reserved_quantity
    }

    /// Stock that is neither sold nor reserved.
    pub fn available(&self) -> u32 {
        self.quantity - self.reserved_quantity
    }

    /// Returns true if `requested` units can be newly reserved.
    pub fn can_reserve(&self, requested: u32) -> bool {
        self.available() >= requested
    }

    /// Earmarks `qty` units for a pending order.
    pub fn reserve(&mut self, qty: u32) -> Result<StockChange, InventoryError> {
        require_positive(qty)?;
        if !self.can_reserve(qty) {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id,
                available: self.available(),
                requested: qty,
            });
        }
        let before = self.reserved_quantity;
        self.reserved_quantity += qty;
        Ok(StockChange::new(
            StockCounter::Reserved,
            before,
            self.reserved_quantity,
        ))
    }

    /// Drops up to `qty` units of reservation. Over-release clamps at zero.
    pub fn release(&mut self, qty: u32) -> StockChange {
        let before = self.reserved_quantity;
        self.reserved_quantity -= qty.min(self.reserved_quantity);
        StockChange::new(StockCounter::Reserved, before, self.reserved_quantity)
    }

    /// Converts `qty` reserved units into a sale: both counters drop by `qty`.
    ///
    /// The reservation must still exist and still be backed by stock on hand;
    /// the row may have drifted since the reservation was taken.
    pub fn commit_reduction(&mut self, qty: u32) -> Result<[StockChange; 2], InventoryError> {
        require_positive(qty)?;
        self.check_commit(qty)?;
        let quantity_before = self.quantity;
        let reserved_before = self.reserved_quantity;
        self.quantity -= qty;
        self.reserved_quantity -= qty;
        Ok([
            StockChange::new(StockCounter::Quantity, quantity_before, self.quantity),
            StockChange::new(StockCounter::Reserved, reserved_before, self.reserved_quantity),
        ])
    }

    /// Verifies a commit of `qty` would succeed, without mutating.
    pub fn check_commit(&self, qty: u32) -> Result<(), InventoryError> {
        if self.reserved_quantity < qty || self.quantity < qty {
            return Err(InventoryError::UnbackedReservation {
                product_id: self.product_id,
                quantity: self.quantity,
                reserved: self.reserved_quantity,
                requested: qty,
            });
        }
        Ok(())
    }

    /// Adds physical stock.
    pub fn restock(&mut self, qty: u32) -> Result<StockChange, InventoryError> {
        require_positive(qty)?;
        let before = self.quantity;
        self.quantity = self
            .quantity
            .checked_add(qty)
            .ok_or(InventoryError::Overflow {
                product_id: self.product_id,
            })?;
        Ok(StockChange::new(StockCounter::Quantity, before, self.quantity))
    }

    /// Overwrites on-hand stock (stock-take adjustment). Never below what is reserved.
    pub fn set_quantity(&mut self, quantity: u32) -> Result<StockChange, InventoryError> {
        if quantity < self.reserved_quantity {
            return Err(InventoryError::BelowReserved {
                product_id: self.product_id,
                reserved: self.reserved_quantity,
                requested: quantity,
            });
        }
        let before = self.quantity;
        self.quantity = quantity;
        Ok(StockChange::new(StockCounter::Quantity, before, self.quantity))
    }
}

fn require_positive(qty: u32) -> Result<(), InventoryError> {
    if qty == 0 {
        return Err(InventoryError::InvalidQuantity { quantity: qty });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(quantity: u32, reserved: u32) -> InventoryRecord {
        InventoryRecord::new(InventoryId::new(1), ProductId::new(3), quantity, reserved).unwrap()
    }

    #[test]
    fn test_new_rejects_reserved_above_quantity() {
        let err = InventoryRecord::new(InventoryId::new(1), ProductId::new(3), 2, 5).unwrap_err();
        assert!(matches!(err, InventoryError::Corrupt { .. }));
    }

    #[test]
    fn test_reserve_within_availability() {
        let mut inv = record(10, 0);
        let change = inv.reserve(4).unwrap();
        assert_eq!(change.counter, StockCounter::Reserved);
        assert_eq!((change.before, change.after), (0, 4));
        assert_eq!(inv.available(), 6);
    }

    #[test]
    fn test_reserve_beyond_availability_fails() {
        let mut inv = record(10, 8);
        let err = inv.reserve(4).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                product_id: ProductId::new(3),
                available: 2,
                requested: 4,
            }
        );
        assert_eq!(inv.reserved_quantity(), 8);
    }

    #[test]
    fn test_reserve_zero_is_invalid() {
        let mut inv = record(10, 0);
        assert!(matches!(
            inv.reserve(0),
            Err(InventoryError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut inv = record(10, 3);
        let change = inv.release(5);
        assert_eq!(inv.reserved_quantity(), 0);
        assert_eq!(change.delta(), -3);

        let again = inv.release(1);
        assert!(again.is_noop());
    }

    #[test]
    fn test_commit_reduction_consumes_reservation() {
        let mut inv = record(10, 4);
        let [quantity, reserved] = inv.commit_reduction(4).unwrap();
        assert_eq!((quantity.before, quantity.after), (10, 6));
        assert_eq!((reserved.before, reserved.after), (4, 0));
        assert_eq!(inv.available(), 6);
    }

    #[test]
    fn test_commit_reduction_without_reservation_fails() {
        let mut inv = record(10, 1);
        let err = inv.commit_reduction(2).unwrap_err();
        assert!(matches!(err, InventoryError::UnbackedReservation { .. }));
        assert_eq!(inv.quantity(), 10);
        assert_eq!(inv.reserved_quantity(), 1);
    }

    #[test]
    fn test_restock_adds_quantity() {
        let mut inv = record(1, 1);
        let change = inv.restock(9).unwrap();
        assert_eq!(change.delta(), 9);
        assert_eq!(inv.quantity(), 10);
    }

    #[test]
    fn test_restock_overflow_is_rejected() {
        let mut inv = record(u32::MAX, 0);
        assert!(matches!(
            inv.restock(1),
            Err(InventoryError::Overflow { .. })
        ));
    }

    #[test]
    fn test_set_quantity_cannot_drop_below_reserved() {
        let mut inv = record(10, 6);
        assert!(matches!(
            inv.set_quantity(5),
            Err(InventoryError::BelowReserved { .. })
        ));
        inv.set_quantity(6).unwrap();
        assert_eq!(inv.available(), 0);
    }

    #[test]
    fn test_counter_names_round_trip() {
        for counter in [StockCounter::Quantity, StockCounter::Reserved] {
            assert_eq!(StockCounter::parse(counter.as_str()), Some(counter));
        }
        assert_eq!(StockCounter::parse("other"), None);
    }
}

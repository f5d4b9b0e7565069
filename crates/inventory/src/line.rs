//! Stock requests and their normalization.

use std::collections::BTreeMap;

use common::ProductId;
use domain::OrderItem;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// A `(product, quantity)` pair to check, reserve, commit, or restock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

impl From<&OrderItem> for StockLine {
    fn from(item: &OrderItem) -> Self {
        Self::new(item.product_id, item.quantity)
    }
}

/// Sums duplicate product lines and orders the result by ascending product id.
///
/// Multi-row operations lock in this order so two transactions touching the
/// same products can never wait on each other in a cycle.
pub fn aggregate_lines(lines: &[StockLine]) -> Result<BTreeMap<ProductId, u32>> {
    let mut totals = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "quantity for product {} must be greater than 0",
                line.product_id
            )));
        }
        let total: &mut u32 = totals.entry(line.product_id).or_default();
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            LedgerError::InvalidArgument(format!(
                "quantity for product {} overflows",
                line.product_id
            ))
        })?;
    }
    Ok(totals)
}

//! Catalog product, as far as the core needs it: identity and price.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::ProductError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Money,
}

impl Product {
    /// Builds a validated product.
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Money,
    ) -> Result<Self, ProductError> {
        let product = Self {
            id,
            sku: sku.into(),
            name: name.into(),
            price,
        };
        product.validate()?;
        Ok(product)
    }

    pub fn validate(&self) -> Result<(), ProductError> {
        if !self.price.is_positive() {
            return Err(ProductError::InvalidPrice {
                cents: self.price.cents(),
            });
        }
        if self.sku.trim().len() < 3 {
            return Err(ProductError::InvalidSku);
        }
        if self.name.trim().is_empty() {
            return Err(ProductError::MissingName);
        }
        Ok(())
    }
}

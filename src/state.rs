//! Inventory state reconstructed by replay

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::traits::State;

/// A product as seen at some point in the ledger.
///
/// Never stored directly; always rebuilt by folding transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub sku: String,
    pub product_name: String,
    pub price: Decimal,
    pub category: String,
    /// Quantity per location name; absent locations hold zero
    pub locations: BTreeMap<String, u64>,
    pub is_deleted: bool,
}

impl Product {
    pub fn new(
        sku: impl Into<String>,
        product_name: impl Into<String>,
        price: Decimal,
        category: impl Into<String>,
    ) -> Self {
        Self {
            sku: sku.into(),
            product_name: product_name.into(),
            price,
            category: category.into(),
            locations: BTreeMap::new(),
            is_deleted: false,
        }
    }

    pub fn quantity_at(&self, location: &str) -> u64 {
        self.locations.get(location).copied().unwrap_or(0)
    }

    /// Stock summed across every location
    pub fn total_stock(&self) -> u64 {
        self.locations.values().fold(0, |acc, q| acc.saturating_add(*q))
    }

    /// `price × total_stock`, or `None` when it does not fit a `Decimal`
    pub fn stock_value(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.total_stock()))
    }
}

/// Every product ever created, keyed by SKU
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryState {
    pub products: BTreeMap<String, Product>,
}

impl InventoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product(&self, sku: &str) -> Option<&Product> {
        self.products.get(sku)
    }

    /// Products not marked deleted
    pub fn active_products(&self) -> impl Iterator<Item = &Product> {
        self.products.values().filter(|p| !p.is_deleted)
    }

    pub fn total_stock(&self, sku: &str) -> u64 {
        self.products.get(sku).map(Product::total_stock).unwrap_or(0)
    }

    /// Value of all live stock, or `None` on overflow
    pub fn total_value(&self) -> Option<Decimal> {
        self.active_products()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.stock_value()?))
    }
}

impl State for InventoryState {
    fn validate(&self) -> Result<(), ValidationError> {
        for (sku, product) in &self.products {
            if sku != &product.sku {
                return Err(ValidationError::InvalidState {
                    reason: format!("SKU key mismatch: key={}, product.sku={}", sku, product.sku),
                });
            }
            if product.price.is_sign_negative() && !product.price.is_zero() {
                return Err(ValidationError::InvalidState {
                    reason: format!("{} has negative price {}", sku, product.price),
                });
            }
            if product.is_deleted && product.total_stock() > 0 {
                return Err(ValidationError::InvalidState {
                    reason: format!("{} is deleted but still holds stock", sku),
                });
            }
        }
        Ok(())
    }
}

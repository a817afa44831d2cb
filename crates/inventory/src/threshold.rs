//! Low-stock detection over ledger writes.

use thiserror::Error;

use stockflow_core::{DomainError, ProductName};

use crate::ledger::{MalformedQuantity, parse_quantity};
use crate::stock::LowStock;

/// Quantity below which a product is low on stock.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

/// Why a ledger write was not evaluated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error(transparent)]
    MalformedQuantity(#[from] MalformedQuantity),

    #[error("ledger key is not a product name: {0}")]
    InvalidProduct(#[from] DomainError),
}

/// Decides whether a written ledger value warrants a low-stock alert.
///
/// Every qualifying write alerts; there is no memory of earlier writes, so a
/// product that stays below the threshold alerts again on each update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowStockRule {
    threshold: i64,
}

impl Default for LowStockRule {
    fn default() -> Self {
        Self {
            threshold: LOW_STOCK_THRESHOLD,
        }
    }
}

impl LowStockRule {
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn is_low(&self, quantity: i64) -> bool {
        quantity < self.threshold
    }

    /// Evaluate a raw ledger write (`key` = product name, `raw` = stored value).
    pub fn evaluate(&self, key: &str, raw: &str) -> Result<Option<LowStock>, SkipReason> {
        let quantity = parse_quantity(raw)?;
        if !self.is_low(quantity) {
            return Ok(None);
        }
        let product_name = ProductName::parse(key)?;
        Ok(Some(LowStock { product_name }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_threshold_is_not_low() {
        let rule = LowStockRule::default();
        assert_eq!(rule.evaluate("Apples", "10"), Ok(None));
    }

    #[test]
    fn below_threshold_alerts() {
        let rule = LowStockRule::default();
        let alert = rule.evaluate("Apples", "9").unwrap().unwrap();
        assert_eq!(alert.product_name.as_str(), "Apples");
    }

    #[test]
    fn negative_quantities_are_low() {
        assert!(LowStockRule::default().evaluate("Apples", "-3").unwrap().is_some());
    }

    #[test]
    fn malformed_values_are_skipped() {
        let rule = LowStockRule::default();
        assert!(matches!(
            rule.evaluate("Apples", "lots"),
            Err(SkipReason::MalformedQuantity(_))
        ));
    }

    #[test]
    fn invalid_keys_are_skipped_only_when_low() {
        let rule = LowStockRule::default();
        assert_eq!(rule.evaluate("bad key", "50"), Ok(None));
        assert!(matches!(
            rule.evaluate("bad key", "1"),
            Err(SkipReason::InvalidProduct(_))
        ));
    }

    #[test]
    fn default_threshold_is_ten() {
        let rule = LowStockRule::default();
        assert_eq!(rule.threshold(), LOW_STOCK_THRESHOLD);
        assert!(rule.is_low(9));
        assert!(!rule.is_low(10));
    }
}

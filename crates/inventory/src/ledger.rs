//! Per-product quantity ledger (the fold of all stock changes).
//!
//! The stored value is the decimal string of a signed integer. An absent
//! entry reads as zero.

use core::str::FromStr;

use thiserror::Error;

use stockflow_core::{DomainError, ProductName};

use crate::stock::StockDelta;

/// What to do when a sale would drive a product's quantity below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NegativeStockPolicy {
    /// Apply the sale anyway; the ledger may go negative.
    #[default]
    Allow,
    /// Apply the sale but clamp the result at zero; an entry already below
    /// zero is left where it is.
    FloorAtZero,
    /// Refuse to apply the sale.
    Reject,
}

impl FromStr for NegativeStockPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "floor" | "floor_at_zero" => Ok(Self::FloorAtZero),
            "reject" => Ok(Self::Reject),
            other => Err(DomainError::validation(format!(
                "unknown negative stock policy {other:?} (expected allow, floor or reject)"
            ))),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerRejection {
    #[error("applying {delta} to {current} would go negative")]
    Negative { current: i64, delta: i64 },

    #[error("applying {delta} to {current} overflows")]
    Overflow { current: i64, delta: i64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stored quantity {raw:?} is not an integer")]
pub struct MalformedQuantity {
    pub raw: String,
}

/// Compute the next ledger value.
pub fn apply_delta(
    current: i64,
    delta: i64,
    policy: NegativeStockPolicy,
) -> Result<i64, LedgerRejection> {
    let next = current
        .checked_add(delta)
        .ok_or(LedgerRejection::Overflow { current, delta })?;

    if next >= 0 || delta >= 0 {
        return Ok(next);
    }

    match policy {
        NegativeStockPolicy::Allow => Ok(next),
        // A sale never raises stock, even on an entry that is already negative.
        NegativeStockPolicy::FloorAtZero => Ok(next.max(current.min(0))),
        NegativeStockPolicy::Reject => Err(LedgerRejection::Negative { current, delta }),
    }
}

pub fn parse_quantity(raw: &str) -> Result<i64, MalformedQuantity> {
    raw.parse::<i64>().map_err(|_| MalformedQuantity {
        raw: raw.to_string(),
    })
}

pub fn encode_quantity(quantity: i64) -> String {
    quantity.to_string()
}

/// In-memory view of one product's ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub product_name: ProductName,
    pub quantity: i64,
}

impl LedgerEntry {
    /// An entry that was never written.
    pub fn empty(product_name: ProductName) -> Self {
        Self {
            product_name,
            quantity: 0,
        }
    }

    pub fn apply(
        &mut self,
        delta: &StockDelta,
        policy: NegativeStockPolicy,
    ) -> Result<i64, LedgerRejection> {
        self.quantity = apply_delta(self.quantity, delta.signed(), policy)?;
        Ok(self.quantity)
    }

    /// Fold a sequence of deltas for one product, in order, from zero.
    ///
    /// Rejected deltas leave the entry unchanged.
    pub fn fold<'a>(
        product_name: ProductName,
        deltas: impl IntoIterator<Item = &'a StockDelta>,
        policy: NegativeStockPolicy,
    ) -> Self {
        let mut entry = Self::empty(product_name);
        for delta in deltas {
            if delta.product_name() == &entry.product_name {
                let _ = entry.apply(delta, policy);
            }
        }
        entry
    }
}

//! Inventory domain module.
//!
//! This crate contains the business rules of the stock pipeline, implemented
//! purely as deterministic domain logic (no IO, no broker, no storage).

pub mod generator;
pub mod ledger;
pub mod stock;
pub mod threshold;

pub use generator::{DEMO_PRODUCTS, StockGenerator};
pub use ledger::{
    LedgerEntry, LedgerRejection, MalformedQuantity, NegativeStockPolicy, apply_delta,
    encode_quantity, parse_quantity,
};
pub use stock::{
    DecodeError, DeltaKind, LowStock, STOCK_CHANGES_FILTER, STOCK_LOW, STOCK_REPLENISHED,
    STOCK_SOLD, StockDelta, StockEvent, StockReplenished, StockSold, low_stock_subject,
    stock_subject,
};
pub use threshold::{LOW_STOCK_THRESHOLD, LowStockRule, SkipReason};

//! Derived alerts computed from the ledger change feed.

pub mod low_stock;

pub use low_stock::{LowStockWatcher, WatchOutcome};

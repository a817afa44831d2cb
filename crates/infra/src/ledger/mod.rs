//! Ledger maintenance: folding stock-change deliveries into the key-value store.

pub mod processed;
pub mod updater;

pub use processed::{InMemoryProcessedMessages, ProcessedError, ProcessedMessages};
#[cfg(feature = "redis")]
pub use processed::RedisProcessedMessages;
pub use updater::{ApplyOutcome, LedgerError, LedgerUpdater};

//! Infrastructure layer: key-value ledger, Redis adapters, workers, config.

pub mod alerts;
pub mod config;
pub mod event_bus;
pub mod kv;
pub mod ledger;
pub mod pipeline;
pub mod workers;

pub use alerts::{LowStockWatcher, WatchOutcome};
pub use config::{AppConfig, ConfigError};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, KvChange, KvEntry, KvError, KvOperation, WatchOptions};
pub use ledger::{ApplyOutcome, InMemoryProcessedMessages, LedgerError, LedgerUpdater, ProcessedMessages};
pub use pipeline::{PipelineError, start_ledger_updater, start_low_stock_watcher};
pub use workers::{PartitionedConsumer, SubscriptionWorker, WorkerHandle};

#[cfg(test)]
mod integration_tests;

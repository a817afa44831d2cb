//! Wiring of the pipeline components onto buses, stores and workers.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use stockflow_events::{ConsumerConfig, DurableEventBus, EventBus, EventEnvelope, SubjectError, SubjectFilter};
use stockflow_inventory::STOCK_CHANGES_FILTER;

use crate::alerts::LowStockWatcher;
use crate::kv::{KeyValueStore, KvError, WatchOptions};
use crate::ledger::{LedgerUpdater, ProcessedMessages};
use crate::workers::{PartitionedConsumer, SubscriptionWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("event bus error: {0}")]
    Bus(String),

    #[error(transparent)]
    Store(#[from] KvError),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Attach the ledger updater as durable consumer `consumer` and run it on
/// `workers` subject-partitioned threads.
pub fn start_ledger_updater<B, S, P>(
    bus: &B,
    updater: Arc<LedgerUpdater<S, P>>,
    consumer: &str,
    workers: usize,
) -> Result<WorkerHandle, PipelineError>
where
    B: DurableEventBus<EventEnvelope<JsonValue>>,
    S: KeyValueStore + 'static,
    P: ProcessedMessages + 'static,
{
    let filter = SubjectFilter::parse(STOCK_CHANGES_FILTER)?;
    let deliveries = bus
        .consume(&ConsumerConfig::new(consumer, filter))
        .map_err(|e| PipelineError::Bus(e.to_string()))?;

    let policy = updater.policy();
    let handle = PartitionedConsumer::spawn("ledger-updater", deliveries, workers, move |delivery| {
        updater.handle(delivery).map(|_| ())
    })?;

    info!(consumer, workers, policy = ?policy, "ledger updater started");
    Ok(handle)
}

/// Run the low-stock watcher over live ledger updates.
pub fn start_low_stock_watcher<S, B>(store: &S, watcher: LowStockWatcher<B>) -> Result<WorkerHandle, PipelineError>
where
    S: KeyValueStore,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    let feed = store.watch_all(WatchOptions::updates_only())?;
    let threshold = watcher.rule().threshold();

    let handle = SubscriptionWorker::spawn("low-stock-watcher", feed, move |change| {
        watcher.handle(&change);
        Ok::<(), Infallible>(())
    })?;

    info!(threshold, "low stock watcher started");
    Ok(handle)
}

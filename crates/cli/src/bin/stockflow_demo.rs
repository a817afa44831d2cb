use std::convert::Infallible;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use stockflow_cli::args::ConfigArgs;
use stockflow_cli::{generator, runtime};
use stockflow_events::{EventBus, EventEnvelope, InMemoryEventBus, SubjectFilter};
use stockflow_infra::{
    InMemoryKeyValueStore, InMemoryProcessedMessages, KeyValueStore, LedgerUpdater, LowStockWatcher,
    SubscriptionWorker, start_ledger_updater, start_low_stock_watcher,
};
use stockflow_inventory::{LowStock, LowStockRule, StockGenerator};

/// Run generator, ledger updater and low-stock detector in one process
/// over the in-memory bus and key-value store.
#[derive(Debug, Parser)]
#[command(name = "stockflow-demo")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Stop after this many events (runs until Ctrl-C by default).
    #[arg(long)]
    max_events: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let cli = Cli::parse();
    let config = cli.config.load()?;

    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let store = Arc::new(InMemoryKeyValueStore::new());

    let alerts = bus.subscribe(&SubjectFilter::parse("product.>")?);
    let alert_log = SubscriptionWorker::spawn("alert-log", alerts, |envelope: EventEnvelope<JsonValue>| {
        match envelope.decode::<LowStock>() {
            Ok(alert) => info!(product = %alert.product_name, subject = envelope.subject(), "low stock"),
            Err(e) => warn!(subject = envelope.subject(), error = %e, "undecodable alert"),
        }
        Ok::<(), Infallible>(())
    })?;

    // Watch before the updater starts writing so no update is missed.
    let watcher = start_low_stock_watcher(&store, LowStockWatcher::new(Arc::clone(&bus), LowStockRule::default()))?;

    let updater = LedgerUpdater::new(
        Arc::clone(&store),
        InMemoryProcessedMessages::default(),
        config.negative_stock,
    );
    let updater = start_ledger_updater(&bus, Arc::new(updater), &config.consumer, config.workers)?;

    let published = generator::run_generator(
        bus.as_ref(),
        StockGenerator::demo(),
        &config.warehouse_id,
        config.tick(),
        cli.max_events,
        runtime::shutdown_signal(),
    )
    .await?;

    // Let the workers drain what was published before stopping them.
    tokio::time::sleep(config.tick().min(std::time::Duration::from_secs(1))).await;
    runtime::stop_workers(vec![updater, watcher, alert_log]).await?;

    for key in store.keys()? {
        if let Some(entry) = store.get(&key)? {
            info!(product = %key, quantity = %entry.value, revision = entry.revision, "final ledger");
        }
    }
    info!(published, "demo finished");
    Ok(())
}

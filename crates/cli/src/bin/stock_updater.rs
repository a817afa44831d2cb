use std::sync::Arc;

use clap::Parser;
use tracing::info;

use stockflow_cli::args::ConfigArgs;
use stockflow_cli::{connect, runtime};
use stockflow_infra::{LedgerUpdater, start_ledger_updater};

/// Fold stock events from the durable stream into the ledger bucket.
#[derive(Debug, Parser)]
#[command(name = "stock-updater")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = Cli::parse().config.load()?;
    let bus = connect::stock_bus(&config)?;
    let store = connect::ledger_store(&config)?;
    let processed = connect::processed_messages(&config)?;

    let updater = Arc::new(LedgerUpdater::new(store, processed, config.negative_stock));
    let handle = start_ledger_updater(&bus, updater, &config.consumer, config.workers)?;
    info!(consumer = %config.consumer, bucket = %config.bucket, "stock updater running");

    runtime::shutdown_signal().await?;
    runtime::stop_workers(vec![handle]).await
}

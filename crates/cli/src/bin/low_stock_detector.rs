use clap::Parser;
use tracing::info;

use stockflow_cli::args::ConfigArgs;
use stockflow_cli::{connect, runtime};
use stockflow_infra::{LowStockWatcher, start_low_stock_watcher};
use stockflow_inventory::LowStockRule;

/// Watch ledger writes and publish low-stock alerts.
#[derive(Debug, Parser)]
#[command(name = "low-stock-detector")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let cli = Cli::parse();
    let config = cli.config.load()?;
    let bus = connect::stock_bus(&config)?;
    let store = connect::ledger_store(&config)?;

    let rule = LowStockRule::default();
    let threshold = rule.threshold();
    let handle = start_low_stock_watcher(&store, LowStockWatcher::new(bus, rule))?;
    info!(bucket = %config.bucket, threshold, "low stock detector running");

    runtime::shutdown_signal().await?;
    runtime::stop_workers(vec![handle]).await
}

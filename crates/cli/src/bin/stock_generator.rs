use anyhow::Context;
use clap::Parser;
use tracing::info;

use stockflow_cli::args::ConfigArgs;
use stockflow_cli::{connect, generator, runtime};
use stockflow_inventory::StockGenerator;

/// Publish random sold/replenished events for the demo products.
#[derive(Debug, Parser)]
#[command(name = "stock-generator")]
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
    let bus = connect::stock_bus(&config)?;

    info!(warehouse = %config.warehouse_id, tick_ms = config.tick_ms, "stock generator started");
    let published = generator::run_generator(
        &bus,
        StockGenerator::demo(),
        &config.warehouse_id,
        config.tick(),
        cli.max_events,
        runtime::shutdown_signal(),
    )
    .await
    .context("stock generator failed")?;

    info!(published, "stock generator stopped");
    Ok(())
}

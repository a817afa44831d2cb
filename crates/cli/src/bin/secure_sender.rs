use anyhow::Context;
use clap::Parser;
use tracing::info;

use stockflow_cli::args::ConfigArgs;
use stockflow_cli::connect;
use stockflow_secure::{CurveKeyPair, SECURE_PLAINTEXT, send_sealed};

/// Seal a fixed message for a receiver and publish it once.
#[derive(Debug, Parser)]
#[command(name = "secure-sender")]
struct Cli {
    /// Hex-encoded public key printed by secure-receiver.
    receiver_public_key: String,

    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let cli = Cli::parse();
    let config = cli.config.load()?;
    let bus = connect::secure_bus(&config)?;
    let keys = CurveKeyPair::generate();

    let message = send_sealed(&bus, &keys, &cli.receiver_public_key, SECURE_PLAINTEXT.as_bytes())
        .context("failed to send sealed message")?;

    info!(sender = %message.sender, subject = %message.subject, "sealed message published");
    Ok(())
}

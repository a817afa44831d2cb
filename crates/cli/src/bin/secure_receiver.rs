use std::convert::Infallible;

use clap::Parser;
use tracing::{info, warn};

use stockflow_cli::args::ConfigArgs;
use stockflow_cli::{connect, runtime};
use stockflow_events::{EventBus, SubjectFilter};
use stockflow_infra::SubscriptionWorker;
use stockflow_secure::{CurveKeyPair, SECURE_SUBJECT, open_sealed};

/// Print a fresh public key and open sealed messages addressed to it.
#[derive(Debug, Parser)]
#[command(name = "secure-receiver")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = Cli::parse().config.load()?;
    let bus = connect::secure_bus(&config)?;
    let keys = CurveKeyPair::generate();

    let inbox = bus.subscribe(&SubjectFilter::parse(SECURE_SUBJECT)?);
    println!("{}", keys.public_key());
    info!(public_key = %keys.public_key(), subject = SECURE_SUBJECT, "secure receiver listening");

    let handle = SubscriptionWorker::spawn("secure-receiver", inbox, move |message| {
        match open_sealed(&keys, &message) {
            Ok(plaintext) => {
                let text = String::from_utf8_lossy(&plaintext);
                info!(sender = %message.sender, "received sealed message");
                println!("{text}");
            }
            Err(e) => warn!(sender = %message.sender, error = %e, "could not open sealed message"),
        }
        Ok::<(), Infallible>(())
    })?;

    runtime::shutdown_signal().await?;
    runtime::stop_workers(vec![handle]).await
}

//! Signal handling and worker shutdown for the binaries.

use anyhow::Context;
use tracing::info;

use stockflow_infra::WorkerHandle;

/// Wait for Ctrl-C.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    Ok(())
}

/// Stop workers without blocking the async runtime.
pub async fn stop_workers(handles: Vec<WorkerHandle>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || {
        for handle in handles {
            handle.shutdown();
        }
    })
    .await
    .context("worker shutdown panicked")?;
    info!("workers stopped");
    Ok(())
}

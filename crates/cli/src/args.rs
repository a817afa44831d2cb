//! Command-line overrides layered over [`AppConfig::from_env`].

use anyhow::Context;
use clap::Args;

use stockflow_core::WarehouseId;
use stockflow_infra::AppConfig;
use stockflow_inventory::NegativeStockPolicy;

/// Flags shared by the pipeline binaries. Unset flags keep the environment value.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Redis connection URL.
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Stream carrying stock-change events.
    #[arg(long)]
    pub stream: Option<String>,

    /// Key-value bucket holding the ledger.
    #[arg(long)]
    pub bucket: Option<String>,

    /// Durable consumer name of the ledger updater.
    #[arg(long)]
    pub consumer: Option<String>,

    /// Ledger updater worker threads.
    #[arg(long)]
    pub workers: Option<usize>,

    /// What to do with sales that would drive stock negative: allow, floor or reject.
    #[arg(long)]
    pub negative_stock: Option<NegativeStockPolicy>,

    /// Warehouse id used in generated subjects.
    #[arg(long)]
    pub warehouse_id: Option<WarehouseId>,

    /// Milliseconds between generated events.
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

impl ConfigArgs {
    /// Environment configuration with these flags applied on top.
    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::from_env().context("invalid configuration")?;
        self.apply(&mut config);
        anyhow::ensure!(config.workers > 0, "--workers must be greater than zero");
        anyhow::ensure!(config.tick_ms > 0, "--tick-ms must be greater than zero");
        Ok(config)
    }

    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(v) = &self.redis_url {
            config.redis_url = v.clone();
        }
        if let Some(v) = &self.stream {
            config.stream = v.clone();
        }
        if let Some(v) = &self.bucket {
            config.bucket = v.clone();
        }
        if let Some(v) = &self.consumer {
            config.consumer = v.clone();
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.negative_stock {
            config.negative_stock = v;
        }
        if let Some(v) = &self.warehouse_id {
            config.warehouse_id = v.clone();
        }
        if let Some(v) = self.tick_ms {
            config.tick_ms = v;
        }
    }
}

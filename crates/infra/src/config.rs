//! Process configuration read from the environment.

use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use stockflow_core::WarehouseId;
use stockflow_inventory::NegativeStockPolicy;

pub const REDIS_URL_ENV: &str = "STOCKFLOW_REDIS_URL";
pub const STREAM_ENV: &str = "STOCKFLOW_STREAM";
pub const BUCKET_ENV: &str = "STOCKFLOW_BUCKET";
pub const CONSUMER_ENV: &str = "STOCKFLOW_CONSUMER";
pub const WORKERS_ENV: &str = "STOCKFLOW_WORKERS";
pub const NEGATIVE_STOCK_ENV: &str = "STOCKFLOW_NEGATIVE_STOCK";
pub const WAREHOUSE_ID_ENV: &str = "STOCKFLOW_WAREHOUSE_ID";
pub const TICK_MS_ENV: &str = "STOCKFLOW_TICK_MS";
pub const DEDUP_TTL_SECS_ENV: &str = "STOCKFLOW_DEDUP_TTL_SECS";
pub const MAX_DELIVERIES_ENV: &str = "STOCKFLOW_MAX_DELIVERIES";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub redis_url: String,
    /// Stream holding the stock-change events.
    pub stream: String,
    /// Key-value bucket holding the ledger.
    pub bucket: String,
    /// Durable consumer name of the ledger updater.
    pub consumer: String,
    /// Ledger updater worker threads.
    pub workers: usize,
    pub negative_stock: NegativeStockPolicy,
    pub warehouse_id: WarehouseId,
    pub tick_ms: u64,
    pub dedup_ttl_secs: u64,
    pub max_deliveries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            stream: "stockflow:warehouse".to_string(),
            bucket: "stock".to_string(),
            consumer: "stock_updater".to_string(),
            workers: 4,
            negative_stock: NegativeStockPolicy::Allow,
            warehouse_id: default_warehouse(),
            tick_ms: 1000,
            dedup_ttl_secs: 86_400,
            max_deliveries: 5,
        }
    }
}

fn default_warehouse() -> WarehouseId {
    match WarehouseId::parse("46") {
        Ok(id) => id,
        Err(_) => unreachable!("\"46\" is a valid subject token"),
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(REDIS_URL_ENV) {
            config.redis_url = non_empty(REDIS_URL_ENV, v)?;
        }
        if let Some(v) = lookup(STREAM_ENV) {
            config.stream = non_empty(STREAM_ENV, v)?;
        }
        if let Some(v) = lookup(BUCKET_ENV) {
            config.bucket = non_empty(BUCKET_ENV, v)?;
        }
        if let Some(v) = lookup(CONSUMER_ENV) {
            config.consumer = non_empty(CONSUMER_ENV, v)?;
        }
        if let Some(v) = lookup(WORKERS_ENV) {
            config.workers = parse(WORKERS_ENV, &v)?;
            if config.workers == 0 {
                return Err(invalid(WORKERS_ENV, v, "must be greater than zero"));
            }
        }
        if let Some(v) = lookup(NEGATIVE_STOCK_ENV) {
            config.negative_stock = parse(NEGATIVE_STOCK_ENV, &v)?;
        }
        if let Some(v) = lookup(WAREHOUSE_ID_ENV) {
            config.warehouse_id = parse(WAREHOUSE_ID_ENV, &v)?;
        }
        if let Some(v) = lookup(TICK_MS_ENV) {
            config.tick_ms = parse(TICK_MS_ENV, &v)?;
            if config.tick_ms == 0 {
                return Err(invalid(TICK_MS_ENV, v, "must be greater than zero"));
            }
        }
        if let Some(v) = lookup(DEDUP_TTL_SECS_ENV) {
            config.dedup_ttl_secs = parse(DEDUP_TTL_SECS_ENV, &v)?;
        }
        if let Some(v) = lookup(MAX_DELIVERIES_ENV) {
            config.max_deliveries = parse(MAX_DELIVERIES_ENV, &v)?;
            if config.max_deliveries == 0 {
                return Err(invalid(MAX_DELIVERIES_ENV, v, "must be greater than zero"));
            }
        }

        Ok(config)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.into(),
    }
}

fn non_empty(var: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(var, value, "must not be empty"));
    }
    Ok(value)
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, value.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.warehouse_id.as_str(), "46");
        assert_eq!(config.negative_stock, NegativeStockPolicy::Allow);
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            (REDIS_URL_ENV, "redis://cache:6380"),
            (WORKERS_ENV, "8"),
            (NEGATIVE_STOCK_ENV, "reject"),
            (WAREHOUSE_ID_ENV, "w7"),
            (TICK_MS_ENV, "250"),
        ]))
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6380");
        assert_eq!(config.workers, 8);
        assert_eq!(config.negative_stock, NegativeStockPolicy::Reject);
        assert_eq!(config.warehouse_id.as_str(), "w7");
        assert_eq!(config.tick(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        for (var, value) in [
            (WORKERS_ENV, "0"),
            (WORKERS_ENV, "many"),
            (NEGATIVE_STOCK_ENV, "sometimes"),
            (WAREHOUSE_ID_ENV, "a.b"),
            (BUCKET_ENV, "  "),
            (MAX_DELIVERIES_ENV, "0"),
        ] {
            let err = AppConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: v, .. } if v == var));
        }
    }
}

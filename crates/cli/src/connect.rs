//! Broker connections. Any failure here is fatal at startup.

use anyhow::Context;
use tracing::info;

use stockflow_infra::AppConfig;
use stockflow_infra::event_bus::{RedisPubSubEventBus, RedisStreamsEventBus};
use stockflow_infra::kv::RedisKeyValueStore;
use stockflow_infra::ledger::RedisProcessedMessages;
use stockflow_secure::SealedMessage;

/// Pub/sub channel the secure exchange runs on.
pub const SECURE_CHANNEL: &str = "stockflow:secure";

pub fn stock_bus(config: &AppConfig) -> anyhow::Result<RedisStreamsEventBus> {
    let bus = RedisStreamsEventBus::new(&config.redis_url, config.stream.as_str())
        .context("failed to create stream bus")?
        .with_max_deliveries(config.max_deliveries);
    bus.ping()
        .with_context(|| format!("cannot reach broker at {}", config.redis_url))?;
    info!(stream = %config.stream, "connected to stock stream");
    Ok(bus)
}

pub fn ledger_store(config: &AppConfig) -> anyhow::Result<RedisKeyValueStore> {
    let store = RedisKeyValueStore::connect(&config.redis_url, config.bucket.as_str())
        .with_context(|| format!("cannot open key-value bucket {:?}", config.bucket))?;
    info!(bucket = %config.bucket, "connected to ledger bucket");
    Ok(store)
}

pub fn processed_messages(config: &AppConfig) -> anyhow::Result<RedisProcessedMessages> {
    RedisProcessedMessages::connect(
        &config.redis_url,
        format!("processed:{}", config.consumer),
        config.dedup_ttl_secs,
    )
    .context("cannot open processed-message store")
}

pub fn secure_bus(config: &AppConfig) -> anyhow::Result<RedisPubSubEventBus<SealedMessage>> {
    let bus = RedisPubSubEventBus::new(&config.redis_url, SECURE_CHANNEL)
        .context("failed to create pub/sub bus")?;
    bus.ping()
        .with_context(|| format!("cannot reach broker at {}", config.redis_url))?;
    Ok(bus)
}

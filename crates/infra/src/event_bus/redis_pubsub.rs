//! Redis pub/sub-backed event bus (optional).
//!
//! Redis pub/sub is not durable: messages published while nobody listens are
//! lost. That matches fire-and-forget exchanges such as the sealed secure
//! messages; the stock pipeline uses [`super::RedisStreamsEventBus`].

use std::marker::PhantomData;
use std::sync::mpsc;
use std::thread;

use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use stockflow_events::{EventBus, Routed, SubjectFilter, Subscription};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Redis pub/sub bus for any JSON-serialisable routed message.
///
/// Everything travels on one channel; subscribers filter by subject locally.
#[derive(Debug)]
pub struct RedisPubSubEventBus<M> {
    client: redis::Client,
    channel: String,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for RedisPubSubEventBus<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            channel: self.channel.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> RedisPubSubEventBus<M> {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
            _message: PhantomData,
        })
    }

    /// Round-trip a PING so connectivity problems surface at startup.
    pub fn ping(&self) -> Result<(), RedisBusError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(())
    }
}

impl<M> EventBus<M> for RedisPubSubEventBus<M>
where
    M: Serialize + DeserializeOwned + Routed + Send + 'static,
{
    type Error = RedisBusError;

    #[instrument(skip_all, fields(channel = %self.channel, subject = message.subject()), err)]
    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let _: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        Ok(())
    }

    fn subscribe(&self, filter: &SubjectFilter) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();

        let client = self.client.clone();
        let channel = self.channel.clone();
        let filter = filter.clone();

        // Background thread that receives pub/sub messages and forwards them.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(_) => return,
            };

            let mut pubsub = conn.as_pubsub();
            if pubsub.subscribe(&channel).is_err() {
                return;
            }
            let _ = ready_tx.send(());

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let message: M = match serde_json::from_str(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(channel = %channel, error = %e, "skipping undecodable message");
                        continue;
                    }
                };

                if !filter.matches(message.subject()) {
                    continue;
                }

                if tx.send(message).is_err() {
                    return;
                }
            }
        });

        // Wait until the channel is subscribed so an immediate publish is seen.
        // A failed subscription drops `ready_tx` and yields an empty feed.
        let _ = ready_rx.recv();

        Subscription::new(rx)
    }
}

//! Processed-message tracking for idempotent ledger updates.
//!
//! The ledger value is a bare quantity, so a redelivered event cannot be
//! detected from the value alone. Applied message ids are recorded here
//! instead, and the updater skips ids it has already seen.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use thiserror::Error;

use stockflow_core::MessageId;

/// How many ids the in-memory window keeps by default.
pub const DEFAULT_WINDOW: usize = 100_000;

#[derive(Debug, Error)]
pub enum ProcessedError {
    #[error("processed-message store unavailable: {0}")]
    Unavailable(String),

    #[error("processed-message store lock poisoned")]
    Poisoned,
}

/// Record of message ids that have already been applied.
pub trait ProcessedMessages: Send + Sync {
    fn contains(&self, id: &MessageId) -> Result<bool, ProcessedError>;

    fn record(&self, id: &MessageId) -> Result<(), ProcessedError>;
}

impl<P> ProcessedMessages for std::sync::Arc<P>
where
    P: ProcessedMessages + ?Sized,
{
    fn contains(&self, id: &MessageId) -> Result<bool, ProcessedError> {
        (**self).contains(id)
    }

    fn record(&self, id: &MessageId) -> Result<(), ProcessedError> {
        (**self).record(id)
    }
}

#[derive(Debug, Default)]
struct Window {
    order: VecDeque<MessageId>,
    ids: HashSet<MessageId>,
}

/// Bounded in-memory window of recent ids (oldest evicted first).
#[derive(Debug)]
pub struct InMemoryProcessedMessages {
    capacity: usize,
    window: Mutex<Window>,
}

impl InMemoryProcessedMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.window.lock().map(|w| w.ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryProcessedMessages {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ProcessedMessages for InMemoryProcessedMessages {
    fn contains(&self, id: &MessageId) -> Result<bool, ProcessedError> {
        let window = self.window.lock().map_err(|_| ProcessedError::Poisoned)?;
        Ok(window.ids.contains(id))
    }

    fn record(&self, id: &MessageId) -> Result<(), ProcessedError> {
        let mut window = self.window.lock().map_err(|_| ProcessedError::Poisoned)?;
        if !window.ids.insert(*id) {
            return Ok(());
        }
        window.order.push_back(*id);

        while window.order.len() > self.capacity {
            if let Some(old) = window.order.pop_front() {
                window.ids.remove(&old);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_store::RedisProcessedMessages;

#[cfg(feature = "redis")]
mod redis_store {
    use redis::Commands;

    use super::{MessageId, ProcessedError, ProcessedMessages};

    fn unavailable(e: redis::RedisError) -> ProcessedError {
        ProcessedError::Unavailable(e.to_string())
    }

    /// Redis-backed id set: one `SET NX EX` key per applied message.
    #[derive(Debug, Clone)]
    pub struct RedisProcessedMessages {
        client: redis::Client,
        prefix: String,
        ttl_secs: u64,
    }

    impl RedisProcessedMessages {
        pub fn connect(
            redis_url: impl AsRef<str>,
            prefix: impl Into<String>,
            ttl_secs: u64,
        ) -> Result<Self, ProcessedError> {
            let client = redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
            Ok(Self {
                client,
                prefix: prefix.into(),
                ttl_secs: ttl_secs.max(1),
            })
        }

        fn key(&self, id: &MessageId) -> String {
            format!("{}:{}", self.prefix, id)
        }
    }

    impl ProcessedMessages for RedisProcessedMessages {
        fn contains(&self, id: &MessageId) -> Result<bool, ProcessedError> {
            let mut conn = self.client.get_connection().map_err(unavailable)?;
            conn.exists(self.key(id)).map_err(unavailable)
        }

        fn record(&self, id: &MessageId) -> Result<(), ProcessedError> {
            let mut conn = self.client.get_connection().map_err(unavailable)?;
            let _: Option<String> = redis::cmd("SET")
                .arg(self.key(id))
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_secs)
                .query(&mut conn)
                .map_err(unavailable)?;
            Ok(())
        }
    }
}

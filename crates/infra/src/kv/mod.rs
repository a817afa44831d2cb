//! Revisioned key-value store with a live change feed.
//!
//! The ledger lives here: one key per product, the value being the decimal
//! string of the product's quantity. Every successful write bumps a
//! bucket-wide revision and is announced on the change feed.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryKeyValueStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKeyValueStore;

use std::sync::Arc;

use thiserror::Error;

use stockflow_core::ExpectedRevision;
use stockflow_events::Subscription;

/// Current value of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOperation {
    Put,
    Delete,
}

/// One notification on the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvChange {
    pub key: String,
    /// Written value (empty for deletes).
    pub value: String,
    pub revision: u64,
    pub operation: KvOperation,
}

/// Options for [`KeyValueStore::watch_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    updates_only: bool,
}

impl WatchOptions {
    /// Start with a snapshot of every current key, then live changes.
    pub fn with_snapshot() -> Self {
        Self { updates_only: false }
    }

    /// Live changes only; existing values are not replayed.
    pub fn updates_only() -> Self {
        Self { updates_only: true }
    }

    pub fn is_updates_only(&self) -> bool {
        self.updates_only
    }
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),

    #[error("revision conflict on {key:?} (expected {expected:?}, found {actual:?})")]
    Conflict {
        key: String,
        expected: ExpectedRevision,
        actual: Option<u64>,
    },

    #[error("key-value store lock poisoned")]
    Poisoned,

    #[error("malformed store record: {0}")]
    Malformed(String),
}

impl KvError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, KvError::Conflict { .. })
    }
}

/// Strongly consistent key-value store.
///
/// Reads and writes are atomic per key. `update` is a compare-and-swap on
/// the key's revision; `put` is an unconditional (last-writer-wins) write.
pub trait KeyValueStore: Send + Sync {
    /// Current entry, `None` if the key was never written (or was deleted).
    fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError>;

    /// Write `value` if the key's revision matches `expected`.
    ///
    /// Returns the new revision.
    fn update(&self, key: &str, value: &str, expected: ExpectedRevision) -> Result<u64, KvError>;

    /// Unconditional write. Returns the new revision.
    fn put(&self, key: &str, value: &str) -> Result<u64, KvError> {
        self.update(key, value, ExpectedRevision::Any)
    }

    fn delete(&self, key: &str) -> Result<(), KvError>;

    /// All live keys, sorted.
    fn keys(&self) -> Result<Vec<String>, KvError>;

    /// Change feed over every key in the store.
    fn watch_all(&self, options: WatchOptions) -> Result<Subscription<KvChange>, KvError>;
}

impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        (**self).get(key)
    }

    fn update(&self, key: &str, value: &str, expected: ExpectedRevision) -> Result<u64, KvError> {
        (**self).update(key, value, expected)
    }

    fn put(&self, key: &str, value: &str) -> Result<u64, KvError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        (**self).delete(key)
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        (**self).keys()
    }

    fn watch_all(&self, options: WatchOptions) -> Result<Subscription<KvChange>, KvError> {
        (**self).watch_all(options)
    }
}

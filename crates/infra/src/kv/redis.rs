//! Redis-backed key-value store (optional).
//!
//! Layout for bucket `b`:
//! - `kv:b:<key>`: hash with `value` and `revision`
//! - `kv:b#revision`: bucket-wide revision counter
//! - `kv:b#changes`: pub/sub channel carrying JSON change notifications
//!
//! Compare-and-swap and the change notification run in one Lua script, so a
//! write and its announcement are atomic.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use redis::Commands;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use stockflow_core::ExpectedRevision;
use stockflow_events::Subscription;

use super::{KeyValueStore, KvChange, KvEntry, KvError, KvOperation, WatchOptions};

const UPDATE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'revision')
local actual = -1
if current then actual = tonumber(current) end
if ARGV[2] == 'none' and actual ~= -1 then return {0, actual} end
if ARGV[2] == 'exact' and actual ~= tonumber(ARGV[3]) then return {0, actual} end
local rev = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'value', ARGV[1], 'revision', rev)
redis.call('PUBLISH', KEYS[3], cjson.encode({key = ARGV[4], value = ARGV[1], revision = rev, operation = 'put'}))
return {1, rev}
"#;

const DELETE_SCRIPT: &str = r#"
if redis.call('DEL', KEYS[1]) == 0 then return 0 end
local rev = redis.call('INCR', KEYS[2])
redis.call('PUBLISH', KEYS[3], cjson.encode({key = ARGV[1], value = '', revision = rev, operation = 'del'}))
return rev
"#;

/// How long `watch_all` waits for the feed subscription to be established.
const WATCH_READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct WireChange {
    key: String,
    value: String,
    revision: u64,
    operation: String,
}

impl WireChange {
    fn into_change(self) -> Result<KvChange, KvError> {
        let operation = match self.operation.as_str() {
            "put" => KvOperation::Put,
            "del" => KvOperation::Delete,
            other => return Err(KvError::Malformed(format!("unknown operation {other:?}"))),
        };
        Ok(KvChange {
            key: self.key,
            value: self.value,
            revision: self.revision,
            operation,
        })
    }
}

fn unavailable(e: redis::RedisError) -> KvError {
    KvError::Unavailable(e.to_string())
}

#[derive(Debug, Clone)]
pub struct RedisKeyValueStore {
    client: redis::Client,
    bucket: String,
}

impl RedisKeyValueStore {
    /// Open a bucket and verify the server is reachable.
    pub fn connect(redis_url: impl AsRef<str>, bucket: impl Into<String>) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        let mut conn = client.get_connection().map_err(unavailable)?;
        let _: String = redis::cmd("PING").query(&mut conn).map_err(unavailable)?;

        Ok(Self {
            client,
            bucket: bucket.into(),
        })
    }

    fn entry_key(&self, key: &str) -> String {
        format!("kv:{}:{}", self.bucket, key)
    }

    fn entry_prefix(&self) -> String {
        format!("kv:{}:", self.bucket)
    }

    fn revision_key(&self) -> String {
        format!("kv:{}#revision", self.bucket)
    }

    fn changes_channel(&self) -> String {
        format!("kv:{}#changes", self.bucket)
    }

    fn connection(&self) -> Result<redis::Connection, KvError> {
        self.client.get_connection().map_err(unavailable)
    }

    fn read_entry(conn: &mut redis::Connection, full_key: &str, key: &str) -> Result<Option<KvEntry>, KvError> {
        let fields: HashMap<String, String> = conn.hgetall(full_key).map_err(unavailable)?;
        if fields.is_empty() {
            return Ok(None);
        }

        let value = fields
            .get("value")
            .cloned()
            .ok_or_else(|| KvError::Malformed(format!("{full_key} has no value field")))?;
        let revision = fields
            .get("revision")
            .and_then(|r| r.parse::<u64>().ok())
            .ok_or_else(|| KvError::Malformed(format!("{full_key} has no valid revision")))?;

        Ok(Some(KvEntry {
            key: key.to_string(),
            value,
            revision,
        }))
    }
}

impl KeyValueStore for RedisKeyValueStore {
    #[instrument(skip(self), fields(bucket = %self.bucket), err)]
    fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        let mut conn = self.connection()?;
        Self::read_entry(&mut conn, &self.entry_key(key), key)
    }

    #[instrument(skip(self, value), fields(bucket = %self.bucket), err)]
    fn update(&self, key: &str, value: &str, expected: ExpectedRevision) -> Result<u64, KvError> {
        let mut conn = self.connection()?;

        let (mode, exact) = match expected {
            ExpectedRevision::Any => ("any", 0),
            ExpectedRevision::NoEntry => ("none", 0),
            ExpectedRevision::Exact(r) => ("exact", r),
        };

        let (written, revision): (i64, i64) = redis::Script::new(UPDATE_SCRIPT)
            .key(self.entry_key(key))
            .key(self.revision_key())
            .key(self.changes_channel())
            .arg(value)
            .arg(mode)
            .arg(exact)
            .arg(key)
            .invoke(&mut conn)
            .map_err(unavailable)?;

        if written == 1 {
            Ok(revision as u64)
        } else {
            Err(KvError::Conflict {
                key: key.to_string(),
                expected,
                actual: u64::try_from(revision).ok(),
            })
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket), err)]
    fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let _: i64 = redis::Script::new(DELETE_SCRIPT)
            .key(self.entry_key(key))
            .key(self.revision_key())
            .key(self.changes_channel())
            .arg(key)
            .invoke(&mut conn)
            .map_err(unavailable)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let mut conn = self.connection()?;
        let prefix = self.entry_prefix();
        let found: Vec<String> = conn
            .scan_match::<_, String>(format!("{prefix}*"))
            .map_err(unavailable)?
            .collect();

        let mut keys: Vec<String> = found
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn watch_all(&self, options: WatchOptions) -> Result<Subscription<KvChange>, KvError> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), KvError>>();

        let store = self.clone();
        let channel = self.changes_channel();

        // Background thread that receives change notifications and forwards them.
        thread::spawn(move || {
            let mut conn = match store.client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(unavailable(e)));
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                let _ = ready_tx.send(Err(unavailable(e)));
                return;
            }

            // Subscribed before the snapshot, so no write falls in between.
            if !options.is_updates_only() {
                let snapshot = store.keys().and_then(|keys| {
                    let mut entries = Vec::with_capacity(keys.len());
                    for key in keys {
                        if let Some(entry) = store.get(&key)? {
                            entries.push(entry);
                        }
                    }
                    Ok(entries)
                });
                match snapshot {
                    Ok(entries) => {
                        for entry in entries {
                            let _ = tx.send(KvChange {
                                key: entry.key,
                                value: entry.value,
                                revision: entry.revision,
                                operation: KvOperation::Put,
                            });
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                }
            }

            if ready_tx.send(Ok(())).is_err() {
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "key-value change feed closed");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let change = match serde_json::from_str::<WireChange>(&payload)
                    .map_err(|e| KvError::Malformed(e.to_string()))
                    .and_then(WireChange::into_change)
                {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "skipping malformed change notification");
                        continue;
                    }
                };

                if tx.send(change).is_err() {
                    return;
                }
            }
        });

        match ready_rx.recv_timeout(WATCH_READY_TIMEOUT) {
            Ok(Ok(())) => Ok(Subscription::new(rx)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(KvError::Unavailable(
                "timed out establishing change feed".to_string(),
            )),
        }
    }
}

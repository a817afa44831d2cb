use std::collections::BTreeMap;
use std::sync::{Mutex, mpsc};

use stockflow_core::ExpectedRevision;
use stockflow_events::Subscription;

use super::{KeyValueStore, KvChange, KvEntry, KvError, KvOperation, WatchOptions};

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, KvEntry>,
    revision: u64,
    watchers: Vec<mpsc::Sender<KvChange>>,
}

impl State {
    fn notify(&mut self, change: KvChange) {
        // Drop any dead watchers while notifying.
        self.watchers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// In-memory key-value store for tests/dev.
///
/// One lock serialises all writes, so revisions and notifications are
/// strictly ordered.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    state: Mutex<State>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        let state = self.state.lock().map_err(|_| KvError::Poisoned)?;
        Ok(state.entries.get(key).cloned())
    }

    fn update(&self, key: &str, value: &str, expected: ExpectedRevision) -> Result<u64, KvError> {
        let mut state = self.state.lock().map_err(|_| KvError::Poisoned)?;

        let actual = state.entries.get(key).map(|e| e.revision);
        if !expected.matches(actual) {
            return Err(KvError::Conflict {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        state.revision += 1;
        let revision = state.revision;
        state.entries.insert(
            key.to_string(),
            KvEntry {
                key: key.to_string(),
                value: value.to_string(),
                revision,
            },
        );
        state.notify(KvChange {
            key: key.to_string(),
            value: value.to_string(),
            revision,
            operation: KvOperation::Put,
        });

        Ok(revision)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().map_err(|_| KvError::Poisoned)?;
        if state.entries.remove(key).is_none() {
            return Ok(());
        }

        state.revision += 1;
        let revision = state.revision;
        state.notify(KvChange {
            key: key.to_string(),
            value: String::new(),
            revision,
            operation: KvOperation::Delete,
        });
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let state = self.state.lock().map_err(|_| KvError::Poisoned)?;
        Ok(state.entries.keys().cloned().collect())
    }

    fn watch_all(&self, options: WatchOptions) -> Result<Subscription<KvChange>, KvError> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state.lock().map_err(|_| KvError::Poisoned)?;

        if !options.is_updates_only() {
            for entry in state.entries.values() {
                let _ = tx.send(KvChange {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                    revision: entry.revision,
                    operation: KvOperation::Put,
                });
            }
        }

        state.watchers.push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn absent_key_reads_as_none() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(kv.get("Apples").unwrap(), None);
    }

    #[test]
    fn put_then_get_returns_value_and_revision() {
        let kv = InMemoryKeyValueStore::new();
        let r1 = kv.put("Apples", "50").unwrap();
        let r2 = kv.put("Pears", "3").unwrap();
        assert!(r2 > r1);

        let entry = kv.get("Apples").unwrap().unwrap();
        assert_eq!(entry.value, "50");
        assert_eq!(entry.revision, r1);
        assert_eq!(kv.keys().unwrap(), vec!["Apples".to_string(), "Pears".to_string()]);
    }

    #[test]
    fn update_enforces_expected_revision() {
        let kv = InMemoryKeyValueStore::new();

        let r1 = kv.update("Apples", "1", ExpectedRevision::NoEntry).unwrap();
        let err = kv.update("Apples", "2", ExpectedRevision::NoEntry).unwrap_err();
        assert!(err.is_conflict());

        kv.update("Apples", "2", ExpectedRevision::Exact(r1)).unwrap();
        let stale = kv.update("Apples", "3", ExpectedRevision::Exact(r1)).unwrap_err();
        assert!(matches!(stale, KvError::Conflict { actual: Some(_), .. }));
        assert_eq!(kv.get("Apples").unwrap().unwrap().value, "2");
    }

    #[test]
    fn updates_only_watch_skips_existing_values() {
        let kv = InMemoryKeyValueStore::new();
        kv.put("Apples", "50").unwrap();

        let watch = kv.watch_all(WatchOptions::updates_only()).unwrap();
        assert!(watch.try_recv().is_err());

        kv.put("Apples", "5").unwrap();
        let change = watch.recv_timeout(WAIT).unwrap();
        assert_eq!(change.key, "Apples");
        assert_eq!(change.value, "5");
        assert_eq!(change.operation, KvOperation::Put);
    }

    #[test]
    fn snapshot_watch_replays_current_values_first() {
        let kv = InMemoryKeyValueStore::new();
        kv.put("Apples", "50").unwrap();

        let watch = kv.watch_all(WatchOptions::with_snapshot()).unwrap();
        kv.put("Pears", "7").unwrap();

        assert_eq!(watch.recv_timeout(WAIT).unwrap().key, "Apples");
        assert_eq!(watch.recv_timeout(WAIT).unwrap().key, "Pears");
    }

    #[test]
    fn delete_is_announced_and_clears_key() {
        let kv = InMemoryKeyValueStore::new();
        kv.put("Apples", "50").unwrap();
        let watch = kv.watch_all(WatchOptions::updates_only()).unwrap();

        kv.delete("Apples").unwrap();
        kv.delete("Apples").unwrap();

        let change = watch.recv_timeout(WAIT).unwrap();
        assert_eq!(change.operation, KvOperation::Delete);
        assert!(watch.try_recv().is_err());
        assert_eq!(kv.get("Apples").unwrap(), None);
    }
}

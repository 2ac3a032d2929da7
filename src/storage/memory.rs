use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{change_channel, next_origin, SharedStorage, StorageEvent, StorageWatcher};

struct MemoryInner {
    entries: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

/// In-process storage. Clones share the same origin (same tab);
/// [`MemoryStorage::connect`] opens a handle for another tab.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
    origin: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                entries: Mutex::new(HashMap::new()),
                events: change_channel(),
            }),
            origin: next_origin(),
        }
    }

    pub fn connect(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            origin: next_origin(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.inner.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, key: &str) {
        // No receivers is fine.
        let _ = self.inner.events.send(StorageEvent {
            key: key.to_string(),
            origin: self.origin,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        self.notify(key);
        Ok(())
    }

    fn watch(&self) -> StorageWatcher {
        StorageWatcher::new(self.origin, &self.inner.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_json, write_json, StorageChange};

    #[tokio::test]
    async fn handles_share_entries() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.connect();

        tab_a.set("k", "v").await.unwrap();
        assert_eq!(tab_b.get("k").await.unwrap().as_deref(), Some("v"));

        tab_b.remove("k").await.unwrap();
        assert_eq!(tab_a.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn watcher_skips_own_writes() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.connect();
        let mut watcher = tab_a.watch();

        tab_a.set("own", "1").await.unwrap();
        tab_b.set("lock", "2").await.unwrap();

        assert_eq!(watcher.changed().await, Some(StorageChange::Key("lock".into())));
    }

    #[tokio::test]
    async fn json_helpers_round_trip_and_report_corruption() {
        let storage = MemoryStorage::new();
        write_json(&storage, "list", &vec![1, 2, 3]).await.unwrap();
        let list: Option<Vec<u32>> = read_json(&storage, "list").await.unwrap();
        assert_eq!(list, Some(vec![1, 2, 3]));

        storage.set("list", "{not json").await.unwrap();
        assert!(read_json::<Vec<u32>>(&storage, "list").await.is_err());
        assert!(read_json::<Vec<u32>>(&storage, "missing").await.unwrap().is_none());
    }
}

//! Key/value storage shared between tracker instances.
//!
//! Every handle carries an origin id. Writes are broadcast to all watchers,
//! and a watcher drops the events its own handle produced, so a tab only
//! hears about changes made by other tabs.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

fn next_origin() -> u64 {
    NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed)
}

fn change_channel() -> broadcast::Sender<StorageEvent> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}

#[derive(Debug, Clone)]
struct StorageEvent {
    key: String,
    origin: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange {
    /// Another handle wrote or removed this key.
    Key(String),
    /// Notifications were dropped; the receiver should re-read anything it cares about.
    Lagged(u64),
}

#[async_trait]
pub trait SharedStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    fn watch(&self) -> StorageWatcher;
}

pub struct StorageWatcher {
    origin: u64,
    receiver: broadcast::Receiver<StorageEvent>,
}

impl StorageWatcher {
    fn new(origin: u64, sender: &broadcast::Sender<StorageEvent>) -> Self {
        Self {
            origin,
            receiver: sender.subscribe(),
        }
    }

    /// Waits for the next change made through another handle. `None` once the
    /// storage has been dropped.
    pub async fn changed(&mut self) -> Option<StorageChange> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(StorageChange::Key(event.key)),
                Err(RecvError::Lagged(missed)) => return Some(StorageChange::Lagged(missed)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

pub async fn read_json<T: DeserializeOwned>(storage: &dyn SharedStorage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("failed to parse stored value for '{key}'")),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize + ?Sized>(storage: &dyn SharedStorage, key: &str, value: &T) -> Result<()> {
    let serialized =
        serde_json::to_string(value).with_context(|| format!("failed to serialize value for '{key}'"))?;
    storage.set(key, &serialized).await
}

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex, MutexGuard,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use super::DurationSink;
use crate::models::DurationRecord;

/// In-memory sink for tests.
///
/// Accepts everything while online; refuses everything while offline.
/// Individual records can be refused by duration, and sends can be held
/// until [`RecordingSink::release`] to simulate a slow endpoint.
pub struct RecordingSink {
    online: AtomicBool,
    attempts: AtomicU32,
    delivered: Mutex<Vec<DurationRecord>>,
    refused: Mutex<HashSet<u64>>,
    held: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
            held: watch::channel(false).0,
        }
    }

    pub fn offline() -> Self {
        let sink = Self::new();
        sink.set_online(false);
        sink
    }

    /// Sends block after being counted until [`RecordingSink::release`].
    pub fn held() -> Self {
        let sink = Self::new();
        sink.held.send_replace(true);
        sink
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Refuses every record of exactly `seconds`.
    pub fn refuse_duration(&self, seconds: u64) {
        lock(&self.refused).insert(seconds);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<DurationRecord> {
        lock(&self.delivered).clone()
    }

    pub fn total_seconds(&self) -> u64 {
        self.delivered().iter().map(|record| record.duration).sum()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurationSink for RecordingSink {
    async fn send(&self, record: &DurationRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        if !self.online.load(Ordering::SeqCst) {
            bail!("sink offline");
        }
        if lock(&self.refused).contains(&record.duration) {
            bail!("sink refused {}s record", record.duration);
        }
        lock(&self.delivered).push(record.clone());
        Ok(())
    }
}

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::{
    models::DurationRecord,
    storage::{read_json, write_json, SharedStorage},
    transport::DurationSink,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
}

/// Records that could not be delivered, persisted in shared storage as a
/// JSON array in attempt order.
///
/// Clones share one async mutex, so read-modify-write cycles from the same
/// process never interleave. At most one flush per queue runs at a time.
#[derive(Clone)]
pub struct PendingQueue {
    storage: Arc<dyn SharedStorage>,
    key: String,
    max_entries: usize,
    guard: Arc<Mutex<()>>,
    flushing: Arc<Mutex<()>>,
}

impl PendingQueue {
    pub fn new(storage: Arc<dyn SharedStorage>, key: impl Into<String>, max_entries: usize) -> Self {
        Self {
            storage,
            key: key.into(),
            max_entries,
            guard: Arc::new(Mutex::new(())),
            flushing: Arc::new(Mutex::new(())),
        }
    }

    async fn read_entries(&self) -> Result<Vec<DurationRecord>> {
        Ok(read_json(self.storage.as_ref(), &self.key)
            .await?
            .unwrap_or_default())
    }

    async fn write_entries(&self, entries: &[DurationRecord]) -> Result<()> {
        if entries.is_empty() {
            self.storage.remove(&self.key).await
        } else {
            write_json(self.storage.as_ref(), &self.key, entries).await
        }
    }

    /// Current entries; an unreadable queue reads as empty.
    pub async fn load(&self) -> Vec<DurationRecord> {
        let _lock = self.guard.lock().await;
        match self.read_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                log_warn!("Pending queue '{}' unreadable: {err:#}", self.key);
                Vec::new()
            }
        }
    }

    pub async fn append(&self, record: DurationRecord) {
        let _lock = self.guard.lock().await;

        // Never overwrite a queue we can't parse; the record is lost instead.
        let mut entries = match self.read_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                log_error!(
                    "Dropping {}s {} record, pending queue '{}' unreadable: {err:#}",
                    record.duration,
                    record.activity,
                    self.key
                );
                return;
            }
        };

        entries.push(record);
        if self.max_entries > 0 && entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
            log_warn!(
                "Pending queue '{}' over {} entries, dropped {} oldest",
                self.key,
                self.max_entries,
                excess
            );
        }

        if let Err(err) = self.write_entries(&entries).await {
            log_error!("Failed to persist pending queue '{}': {err:#}", self.key);
        }
    }

    /// Retries every queued record concurrently and keeps only the ones that
    /// still fail. Records queued by others while the flush was in flight are
    /// kept too. A flush requested while another is still sending is skipped.
    pub async fn flush(&self, sink: &dyn DurationSink) -> FlushOutcome {
        let Ok(_flushing) = self.flushing.try_lock() else {
            log_debug!("Flush of pending queue '{}' already running", self.key);
            return FlushOutcome::default();
        };

        let snapshot = {
            let _lock = self.guard.lock().await;
            match self.read_entries().await {
                Ok(entries) => entries,
                Err(err) => {
                    log_warn!("Skipping flush, pending queue '{}' unreadable: {err:#}", self.key);
                    return FlushOutcome::default();
                }
            }
        };

        if snapshot.is_empty() {
            return FlushOutcome::default();
        }

        let results = join_all(snapshot.iter().map(|record| sink.send(record))).await;

        let mut delivered = Vec::new();
        for (record, result) in snapshot.iter().zip(results) {
            match result {
                Ok(()) => delivered.push(record),
                Err(err) => log_debug!("Retry of {}s record still failing: {err:#}", record.duration),
            }
        }

        let _lock = self.guard.lock().await;
        let mut current = match self.read_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                log_error!("Pending queue '{}' unreadable after flush: {err:#}", self.key);
                return FlushOutcome {
                    attempted: snapshot.len(),
                    delivered: delivered.len(),
                    remaining: snapshot.len() - delivered.len(),
                };
            }
        };

        for record in &delivered {
            if let Some(position) = current.iter().position(|entry| entry == *record) {
                current.remove(position);
            }
        }

        if let Err(err) = self.write_entries(&current).await {
            log_error!("Failed to rewrite pending queue '{}': {err:#}", self.key);
        }

        let outcome = FlushOutcome {
            attempted: snapshot.len(),
            delivered: delivered.len(),
            remaining: current.len(),
        };
        log_info!(
            "Flushed pending queue '{}': {} delivered, {} remaining",
            self.key,
            outcome.delivered,
            outcome.remaining
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{ActivityType, Interval},
        storage::MemoryStorage,
        transport::RecordingSink,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn record(offset_secs: i64, seconds: i64) -> DurationRecord {
        let start = t0() + Duration::seconds(offset_secs);
        let interval = Interval::between(start, start + Duration::seconds(seconds)).unwrap();
        DurationRecord::new(ActivityType::Learning, interval, None)
    }

    fn queue(storage: &MemoryStorage, max: usize) -> PendingQueue {
        PendingQueue::new(Arc::new(storage.clone()), "pending", max)
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        queue.append(record(0, 10)).await;
        queue.append(record(10, 20)).await;

        let entries = queue.load().await;
        assert_eq!(entries, vec![record(0, 10), record(10, 20)]);
    }

    #[tokio::test]
    async fn bound_drops_oldest() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 2);
        for i in 0..4 {
            queue.append(record(i * 100, 5)).await;
        }
        assert_eq!(queue.load().await, vec![record(200, 5), record(300, 5)]);
    }

    #[tokio::test]
    async fn corrupt_queue_is_left_alone() {
        let storage = MemoryStorage::new();
        storage.set("pending", "[{broken").await.unwrap();
        let queue = queue(&storage, 0);

        queue.append(record(0, 5)).await;
        assert_eq!(storage.get("pending").await.unwrap().as_deref(), Some("[{broken"));
        assert!(queue.load().await.is_empty());

        let sink = RecordingSink::new();
        assert_eq!(queue.flush(&sink).await, FlushOutcome::default());
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn successful_flush_removes_key() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        queue.append(record(0, 5)).await;
        queue.append(record(5, 7)).await;

        let sink = RecordingSink::new();
        let outcome = queue.flush(&sink).await;

        assert_eq!(outcome, FlushOutcome { attempted: 2, delivered: 2, remaining: 0 });
        assert_eq!(sink.total_seconds(), 12);
        assert_eq!(storage.get("pending").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_flush_keeps_entries_in_order() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        queue.append(record(0, 5)).await;
        queue.append(record(5, 7)).await;

        let sink = RecordingSink::offline();
        let outcome = queue.flush(&sink).await;

        assert_eq!(outcome, FlushOutcome { attempted: 2, delivered: 0, remaining: 2 });
        assert_eq!(queue.load().await, vec![record(0, 5), record(5, 7)]);
    }

    #[tokio::test]
    async fn partial_flush_keeps_failures_in_order() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        for (offset, seconds) in [(0, 5), (10, 7), (20, 9), (30, 11)] {
            queue.append(record(offset, seconds)).await;
        }

        let sink = RecordingSink::new();
        sink.refuse_duration(7);
        sink.refuse_duration(11);
        let outcome = queue.flush(&sink).await;

        assert_eq!(outcome, FlushOutcome { attempted: 4, delivered: 2, remaining: 2 });
        assert_eq!(sink.total_seconds(), 14);
        assert_eq!(queue.load().await, vec![record(10, 7), record(30, 11)]);
    }

    async fn wait_for_attempts(sink: &RecordingSink, attempts: u32) {
        while sink.attempts() < attempts {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn append_during_flush_is_kept() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        queue.append(record(0, 5)).await;
        queue.append(record(10, 7)).await;

        let sink = Arc::new(RecordingSink::held());
        sink.refuse_duration(5);
        let flushing = tokio::spawn({
            let queue = queue.clone();
            let sink = sink.clone();
            async move { queue.flush(sink.as_ref()).await }
        });

        wait_for_attempts(&sink, 2).await;
        queue.append(record(100, 9)).await;
        sink.release();

        let outcome = flushing.await.unwrap();
        assert_eq!(outcome, FlushOutcome { attempted: 2, delivered: 1, remaining: 2 });
        assert_eq!(queue.load().await, vec![record(0, 5), record(100, 9)]);
    }

    #[tokio::test]
    async fn overlapping_flush_is_skipped() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        queue.append(record(0, 5)).await;

        let sink = Arc::new(RecordingSink::held());
        let first = tokio::spawn({
            let queue = queue.clone();
            let sink = sink.clone();
            async move { queue.flush(sink.as_ref()).await }
        });
        wait_for_attempts(&sink, 1).await;

        assert_eq!(queue.flush(sink.as_ref()).await, FlushOutcome::default());
        sink.release();

        assert_eq!(first.await.unwrap().delivered, 1);
        assert_eq!(sink.attempts(), 1);
        assert_eq!(sink.total_seconds(), 5);
    }

    #[tokio::test]
    async fn unreadable_queue_after_flush_reports_failures_as_remaining() {
        let storage = MemoryStorage::new();
        let queue = queue(&storage, 0);
        queue.append(record(0, 5)).await;
        queue.append(record(10, 7)).await;

        let sink = Arc::new(RecordingSink::held());
        sink.refuse_duration(7);
        let flushing = tokio::spawn({
            let queue = queue.clone();
            let sink = sink.clone();
            async move { queue.flush(sink.as_ref()).await }
        });

        wait_for_attempts(&sink, 2).await;
        storage.set("pending", "not json").await.unwrap();
        sink.release();

        let outcome = flushing.await.unwrap();
        assert_eq!(outcome, FlushOutcome { attempted: 2, delivered: 1, remaining: 1 });
        assert_eq!(storage.get("pending").await.unwrap().as_deref(), Some("not json"));
    }

    #[tokio::test]
    async fn empty_queue_flush_is_a_no_op() {
        let storage = MemoryStorage::new();
        let sink = RecordingSink::new();
        assert_eq!(queue(&storage, 0).flush(&sink).await, FlushOutcome::default());
        assert_eq!(sink.attempts(), 0);
    }
}

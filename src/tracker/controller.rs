use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::{
    clock::Clock,
    config::TrackerConfig,
    models::DurationRecord,
    storage::{SharedStorage, StorageChange},
    transport::DurationSink,
};

use super::{
    events::TrackerEvent,
    lock::LockArbiter,
    queue::{FlushOutcome, PendingQueue},
    state::{TrackerState, Visibility},
};

/// Per-tab timekeeper.
///
/// Exactly one tab at a time should hold the shared lock and accumulate
/// active time. The owner reports a heartbeat record every heartbeat
/// interval and a final partial record when it stops being active. Records
/// that can't be delivered go to the pending queue and are retried on mount,
/// when connectivity returns, and on page load.
///
/// The tracker is an explicit state machine: every input arrives as a
/// [`TrackerEvent`] through [`DurationTracker::handle`], and time comes from
/// the injected [`Clock`]. Deliveries and queue flushes run as background
/// tasks so a slow endpoint never holds up the next event.
pub struct DurationTracker {
    tab_id: String,
    config: TrackerConfig,
    state: TrackerState,
    lock: LockArbiter,
    queue: PendingQueue,
    sink: Arc<dyn DurationSink>,
    clock: Arc<dyn Clock>,
    in_flight: TaskTracker,
}

impl DurationTracker {
    pub fn new(
        tab_id: impl Into<String>,
        config: TrackerConfig,
        storage: Arc<dyn SharedStorage>,
        sink: Arc<dyn DurationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tab_id = tab_id.into();
        let lock = LockArbiter::new(storage.clone(), config.lock_key.clone(), tab_id.clone(), config.lock_expiry);
        let queue = PendingQueue::new(storage, config.pending_key.clone(), config.max_pending_logs);

        Self {
            tab_id,
            config,
            state: TrackerState::new(),
            lock,
            queue,
            sink,
            clock,
            in_flight: TaskTracker::new(),
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn lock(&self) -> &LockArbiter {
        &self.lock
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn is_enabled(&self) -> bool {
        self.config.activity.is_some()
    }

    pub async fn mount(&mut self) {
        info!(
            "Tab {} mounted (activity: {}, user: {})",
            self.tab_id,
            self.config
                .activity
                .map(|activity| activity.as_str())
                .unwrap_or("disabled"),
            self.config.user_id.as_deref().unwrap_or("anonymous")
        );
        self.flush_pending_logs();
        self.arbitrate().await;
    }

    pub async fn handle(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::PollTick => self.arbitrate().await,
            TrackerEvent::HeartbeatTick => self.heartbeat().await,
            TrackerEvent::StorageChanged(StorageChange::Key(key)) => {
                if key == self.config.lock_key {
                    self.arbitrate().await;
                }
            }
            TrackerEvent::StorageChanged(StorageChange::Lagged(missed)) => {
                debug!("Tab {} missed {missed} storage notifications", self.tab_id);
                self.arbitrate().await;
            }
            TrackerEvent::VisibilityChanged(Visibility::Hidden) => {
                self.state.visibility = Visibility::Hidden;
                self.finalize().await;
            }
            TrackerEvent::VisibilityChanged(Visibility::Visible) => {
                self.state.visibility = Visibility::Visible;
                self.state.reopen();
                self.arbitrate().await;
            }
            TrackerEvent::BeforeUnload => self.finalize().await,
            TrackerEvent::Online | TrackerEvent::Load => {
                self.flush_pending_logs();
            }
        }
    }

    /// One election round: claim or renew the lock, or step down if another
    /// tab holds it. Hidden tabs stay out of the election.
    pub async fn arbitrate(&mut self) {
        if !self.is_enabled() || self.state.is_hidden() {
            return;
        }

        let now = self.clock.now();
        if self.lock.try_acquire(now).await {
            if !self.state.is_active() {
                self.state.activate(now);
                info!("Tab {} is now the active tab", self.tab_id);
            }
        } else if self.state.is_active() {
            info!("Tab {} lost the lock to another tab", self.tab_id);
            self.finalize().await;
        }
    }

    /// Reports the time accumulated since the last report, if any.
    pub async fn heartbeat(&mut self) {
        let Some(activity) = self.config.activity else {
            return;
        };

        let now = self.clock.now();
        // Accumulation restarts here, before the delivery is dispatched.
        let Some(interval) = self.state.roll_interval(now) else {
            return;
        };

        debug!("Tab {} heartbeat: {}s", self.tab_id, interval.seconds);
        self.dispatch(DurationRecord::new(activity, interval, self.config.student_id.as_deref()));
    }

    /// Reports the final partial span of the current activation and gives up
    /// the lock. Repeat calls within one activation only release.
    pub async fn finalize(&mut self) {
        let activity = match self.config.activity {
            Some(activity) if self.state.can_finalize() => activity,
            _ => {
                self.lock.release().await;
                return;
            }
        };

        let now = self.clock.now();
        if let Some(interval) = self.state.close(now) {
            debug!("Tab {} finalized: {}s", self.tab_id, interval.seconds);
            self.dispatch(DurationRecord::new(activity, interval, self.config.student_id.as_deref()));
        }
        self.lock.release().await;
    }

    /// Retries the pending queue in the background. [`DurationTracker::settle`]
    /// waits for it like any other delivery.
    pub fn flush_pending_logs(&self) -> JoinHandle<FlushOutcome> {
        let sink = self.sink.clone();
        let queue = self.queue.clone();
        self.in_flight
            .spawn(async move { queue.flush(sink.as_ref()).await })
    }

    /// Waits for every dispatched delivery and flush to finish.
    pub async fn settle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    pub async fn unmount(&mut self) {
        self.finalize().await;
        self.settle().await;
        info!("Tab {} unmounted", self.tab_id);
    }

    fn dispatch(&self, record: DurationRecord) {
        let sink = self.sink.clone();
        let queue = self.queue.clone();
        let tab_id = self.tab_id.clone();

        self.in_flight.spawn(async move {
            if let Err(err) = sink.send(&record).await {
                warn!(
                    "Tab {tab_id}: {}s {} record not delivered, queued for retry: {err:#}",
                    record.duration, record.activity
                );
                queue.append(record).await;
            }
        });
    }
}

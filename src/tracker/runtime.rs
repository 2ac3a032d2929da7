use anyhow::{anyhow, Context, Result};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::storage::StorageWatcher;

use super::{controller::DurationTracker, events::TrackerEvent};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Owner-side handle for a tracker running on its own task.
pub struct TrackerHandle {
    events: mpsc::UnboundedSender<TrackerEvent>,
    cancel_token: CancellationToken,
    handle: JoinHandle<DurationTracker>,
}

impl TrackerHandle {
    /// Forwards a host lifecycle event (visibility, unload, online, load).
    pub fn send(&self, event: TrackerEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow!("tracker loop is no longer running"))
    }

    /// Stops the timers, finalizes, waits for in-flight deliveries and hands
    /// the tracker back.
    pub async fn shutdown(self) -> Result<DurationTracker> {
        self.cancel_token.cancel();
        self.handle
            .await
            .context("tracker loop task failed to join")
    }
}

/// Mounts the tracker on a new task and drives it from the poll and
/// heartbeat timers, shared storage notifications and host events.
pub fn spawn(tracker: DurationTracker, watcher: StorageWatcher) -> TrackerHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(tracker_loop(tracker, watcher, events_rx, cancel_token.clone()));

    TrackerHandle {
        events: events_tx,
        cancel_token,
        handle,
    }
}

async fn tracker_loop(
    mut tracker: DurationTracker,
    mut watcher: StorageWatcher,
    mut events: mpsc::UnboundedReceiver<TrackerEvent>,
    cancel_token: CancellationToken,
) -> DurationTracker {
    tracker.mount().await;

    let poll_every = tracker.config().poll_interval;
    let heartbeat_every = tracker.config().heartbeat_interval;

    let mut poll = time::interval_at(Instant::now() + poll_every, poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut watching = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("tracker loop for tab {} shutting down", tracker.tab_id());
                break;
            }
            event = events.recv() => match event {
                Some(event) => tracker.handle(event).await,
                None => break,
            },
            change = watcher.changed(), if watching => match change {
                Some(change) => tracker.handle(TrackerEvent::StorageChanged(change)).await,
                None => {
                    log_warn!("storage notifications closed for tab {}", tracker.tab_id());
                    watching = false;
                }
            },
            _ = poll.tick() => tracker.handle(TrackerEvent::PollTick).await,
            _ = heartbeat.tick() => tracker.handle(TrackerEvent::HeartbeatTick).await,
        }
    }

    tracker.unmount().await;
    tracker
}

use crate::storage::StorageChange;

use super::state::Visibility;

/// Everything that can move the tracker, processed strictly one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Periodic lock arbitration.
    PollTick,
    HeartbeatTick,
    /// Shared storage was changed by another tab.
    StorageChanged(StorageChange),
    VisibilityChanged(Visibility),
    BeforeUnload,
    /// Connectivity came back.
    Online,
    /// The host page finished loading.
    Load,
}

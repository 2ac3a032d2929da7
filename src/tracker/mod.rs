pub mod controller;
pub mod events;
pub mod lock;
pub mod queue;
pub mod runtime;
pub mod state;

pub use controller::DurationTracker;
pub use events::TrackerEvent;
pub use lock::LockArbiter;
pub use queue::{FlushOutcome, PendingQueue};
pub use runtime::{spawn, TrackerHandle};
pub use state::{TrackerState, TrackerStatus, Visibility};

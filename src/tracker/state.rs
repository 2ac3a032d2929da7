use chrono::{DateTime, Utc};

use crate::models::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerStatus {
    #[default]
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    pub status: TrackerStatus,
    /// Start of the span not yet reported. Only meaningful while active.
    pub accumulating_since: Option<DateTime<Utc>>,
    /// Set once the current activation has been finalized; cleared by the
    /// next activation.
    pub finalized: bool,
    pub visibility: Visibility,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.status == TrackerStatus::Active
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility == Visibility::Hidden
    }

    pub fn can_finalize(&self) -> bool {
        self.is_active() && !self.finalized
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = TrackerStatus::Active;
        self.accumulating_since = Some(now);
        self.finalized = false;
    }

    /// Cuts the accumulated span for a heartbeat and restarts accumulation
    /// at `now`. Leaves the state untouched when less than a second has
    /// accumulated.
    pub fn roll_interval(&mut self, now: DateTime<Utc>) -> Option<Interval> {
        if !self.is_active() {
            return None;
        }
        let interval = Interval::between(self.accumulating_since?, now)?;
        self.accumulating_since = Some(now);
        Some(interval)
    }

    /// Ends the activation. The state is inactive and finalized afterwards
    /// whether or not a reportable span remained.
    pub fn close(&mut self, now: DateTime<Utc>) -> Option<Interval> {
        let since = self.accumulating_since.take();
        self.status = TrackerStatus::Inactive;
        self.finalized = true;
        since.and_then(|start| Interval::between(start, now))
    }

    pub fn reopen(&mut self) {
        self.finalized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn roll_restarts_accumulation_only_when_reporting() {
        let mut state = TrackerState::new();
        assert!(state.roll_interval(t0()).is_none());

        state.activate(t0());
        assert!(state.roll_interval(t0() + Duration::milliseconds(400)).is_none());
        assert_eq!(state.accumulating_since, Some(t0()));

        let first = state.roll_interval(t0() + Duration::seconds(5)).unwrap();
        assert_eq!(first.seconds, 5);
        assert_eq!(state.accumulating_since, Some(t0() + Duration::seconds(5)));

        let second = state.roll_interval(t0() + Duration::seconds(7)).unwrap();
        assert_eq!(second.start, first.end);
    }

    #[test]
    fn close_marks_finalized_and_inactive() {
        let mut state = TrackerState::new();
        state.activate(t0());
        assert!(state.can_finalize());

        let interval = state.close(t0() + Duration::seconds(3)).unwrap();
        assert_eq!(interval.seconds, 3);
        assert!(!state.is_active());
        assert!(state.finalized);
        assert!(!state.can_finalize());

        state.activate(t0() + Duration::seconds(10));
        assert!(state.can_finalize());
    }
}

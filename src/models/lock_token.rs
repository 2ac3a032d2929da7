use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The shared record naming the tab that currently owns timekeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockToken {
    pub owner_id: String,
    /// Last renewal, epoch milliseconds.
    pub acquired_at: i64,
}

impl LockToken {
    pub fn new(owner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            acquired_at: now.timestamp_millis(),
        }
    }

    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - self.acquired_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>, expiry: std::time::Duration) -> bool {
        self.age_ms(now) > expiry.as_millis() as i64
    }

    pub fn is_owned_by(&self, tab_id: &str) -> bool {
        self.owner_id == tab_id
    }
}

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::{
    models::LockToken,
    storage::{read_json, write_json, SharedStorage},
};

/// Single-owner election over a token in shared storage.
///
/// Read-then-write with no compare-and-swap: two tabs racing on an expired
/// token can both believe they won until the next poll, when the last writer
/// keeps it.
pub struct LockArbiter {
    storage: Arc<dyn SharedStorage>,
    key: String,
    tab_id: String,
    expiry: Duration,
}

impl LockArbiter {
    pub fn new(storage: Arc<dyn SharedStorage>, key: impl Into<String>, tab_id: impl Into<String>, expiry: Duration) -> Self {
        Self {
            storage,
            key: key.into(),
            tab_id: tab_id.into(),
            expiry,
        }
    }

    /// The current token; unreadable tokens count as absent.
    pub async fn read_token(&self) -> Option<LockToken> {
        match read_json::<LockToken>(self.storage.as_ref(), &self.key).await {
            Ok(token) => token,
            Err(err) => {
                warn!("Treating lock '{}' as free: {err:#}", self.key);
                None
            }
        }
    }

    pub async fn owner(&self) -> Option<String> {
        self.read_token().await.map(|token| token.owner_id)
    }

    /// Acquires or renews the lock. Returns false only when another tab holds
    /// an unexpired token.
    pub async fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let claimable = match self.read_token().await {
            None => true,
            Some(token) if token.is_owned_by(&self.tab_id) => true,
            Some(token) if token.is_expired(now, self.expiry) => {
                debug!(
                    "Tab {} reclaiming lock from {} (stale for {}ms)",
                    self.tab_id,
                    token.owner_id,
                    token.age_ms(now)
                );
                true
            }
            Some(_) => false,
        };

        if !claimable {
            return false;
        }

        // A failed write still counts as ownership so tracking degrades to
        // per-tab instead of stopping.
        if let Err(err) = write_json(self.storage.as_ref(), &self.key, &LockToken::new(&self.tab_id, now)).await {
            warn!("Tab {} failed to write lock '{}': {err:#}", self.tab_id, self.key);
        }
        true
    }

    /// Removes the token if this tab owns it.
    pub async fn release(&self) {
        match self.read_token().await {
            Some(token) if token.is_owned_by(&self.tab_id) => {
                if let Err(err) = self.storage.remove(&self.key).await {
                    warn!("Tab {} failed to release lock '{}': {err:#}", self.tab_id, self.key);
                }
            }
            _ => {}
        }
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::ActivityType;

pub const DEFAULT_LOCK_KEY: &str = "durationLoggerLock";
pub const DEFAULT_PENDING_KEY: &str = "pendingDurationLogs";
pub const DEFAULT_TAB_KEY: &str = "durationLoggerTabId";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5 * 60;
const DEBUG_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_LOCK_EXPIRY_SECS: u64 = 10;
const DEFAULT_MAX_PENDING_LOGS: usize = 1000;

const APP_DIR: &str = "learnclock";

/// Runtime parameters for one tracker instance.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub user_id: Option<String>,
    /// `None` disables timekeeping entirely.
    pub activity: Option<ActivityType>,
    pub student_id: Option<String>,
    pub lock_key: String,
    pub pending_key: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub lock_expiry: Duration,
    /// Zero means unbounded.
    pub max_pending_logs: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            activity: None,
            student_id: None,
            lock_key: DEFAULT_LOCK_KEY.into(),
            pending_key: DEFAULT_PENDING_KEY.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            lock_expiry: Duration::from_secs(DEFAULT_LOCK_EXPIRY_SECS),
            max_pending_logs: DEFAULT_MAX_PENDING_LOGS,
        }
    }
}

impl TrackerConfig {
    pub fn for_activity(activity: ActivityType) -> Self {
        Self {
            activity: Some(activity),
            ..Self::default()
        }
    }
}

/// On-disk settings for the `learnclock` host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerSettings {
    pub user_id: Option<String>,
    pub activity: Option<ActivityType>,
    pub student_id: Option<String>,
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub storage_path: Option<PathBuf>,
    pub lock_key: String,
    pub pending_key: String,
    pub tab_key: String,
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub lock_expiry_secs: u64,
    pub max_pending_logs: usize,
    pub request_timeout_secs: Option<u64>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            user_id: None,
            activity: Some(ActivityType::Learning),
            student_id: None,
            endpoint: None,
            auth_token: None,
            storage_path: None,
            lock_key: DEFAULT_LOCK_KEY.into(),
            pending_key: DEFAULT_PENDING_KEY.into(),
            tab_key: DEFAULT_TAB_KEY.into(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            lock_expiry_secs: DEFAULT_LOCK_EXPIRY_SECS,
            max_pending_logs: DEFAULT_MAX_PENDING_LOGS,
            request_timeout_secs: None,
        }
    }
}

impl TrackerSettings {
    pub fn tracker_config(&self) -> TrackerConfig {
        let heartbeat_secs = if debug_mode() {
            DEBUG_HEARTBEAT_INTERVAL_SECS
        } else {
            self.heartbeat_interval_secs
        };

        TrackerConfig {
            user_id: self.user_id.clone(),
            activity: self.activity,
            student_id: self.student_id.clone(),
            lock_key: self.lock_key.clone(),
            pending_key: self.pending_key.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
            lock_expiry: Duration::from_secs(self.lock_expiry_secs),
            max_pending_logs: self.max_pending_logs,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Explicit `storage_path`, else the platform data directory.
    pub fn resolved_storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("learnclock.sqlite3")
        })
    }
}

fn debug_mode() -> bool {
    std::env::var("LEARNCLOCK_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("settings.json")
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                TrackerSettings::default()
            })
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> TrackerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), TrackerSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "activity": "teaching", "student_id": "s-9", "lock_expiry_secs": 30 }"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).unwrap().settings();
        assert_eq!(settings.activity, Some(ActivityType::Teaching));
        assert_eq!(settings.student_id.as_deref(), Some("s-9"));
        assert_eq!(settings.lock_expiry_secs, 30);
        assert_eq!(settings.pending_key, DEFAULT_PENDING_KEY);

        let config = settings.tracker_config();
        assert_eq!(config.lock_expiry, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        assert_eq!(SettingsStore::new(path).unwrap().settings(), TrackerSettings::default());
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.settings();
        settings.endpoint = Some("https://api.example.com/duration-logs".into());
        store.update(settings.clone()).unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        assert_eq!(reloaded.settings(), settings);
    }
}

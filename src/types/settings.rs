use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level sync settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Interval of the idle reconciliation heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Number of local changes that triggers an immediate upload.
    pub change_threshold: u32,
    /// Quiet period after the last change before a batched upload fires.
    pub debounce_delay_ms: u64,
    /// Upload retries after the first failed attempt.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Reconnect probe interval while offline.
    pub offline_check_interval_ms: u64,
    /// Item-count delta above which startup reconciliation asks the user.
    pub divergence_threshold: usize,
    /// Cap on persisted failed uploads; oldest are dropped first.
    pub max_failed_uploads: usize,
    pub enable_logging: bool,
    /// Application secret mixed into every per-user encryption key.
    pub app_secret: String,
    pub remote: RemoteSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 60_000,
            change_threshold: 10,
            debounce_delay_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 5_000,
            offline_check_interval_ms: 5_000,
            divergence_threshold: 10,
            max_failed_uploads: 5,
            enable_logging: true,
            app_secret: String::new(),
            remote: RemoteSettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn offline_check_interval(&self) -> Duration {
        Duration::from_millis(self.offline_check_interval_ms)
    }
}

/// Connection settings for the hosted remote store (PostgREST-compatible).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            table: "user_bookmarks".to_string(),
            timeout_secs: 30,
        }
    }
}

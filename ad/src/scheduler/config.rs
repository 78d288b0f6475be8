//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max downloads in flight across all accounts
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Max downloads in flight for one account
    #[serde(rename = "max-per-account", default = "default_max_per_account")]
    pub max_per_account: usize,

    /// Silence after which an in-flight download is considered stalled
    #[serde(rename = "callback-timeout-ms", default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// How often the watchdog checks in-flight downloads
    #[serde(rename = "watchdog-interval-ms", default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Delay between connection-error retries once past the delay threshold
    #[serde(rename = "connection-retry-delay-ms", default = "default_connection_retry_delay_ms")]
    pub connection_retry_delay_ms: u64,

    /// Connection-error retries that happen immediately
    #[serde(rename = "connection-delay-threshold", default = "default_connection_delay_threshold")]
    pub connection_delay_threshold: u32,

    /// Retries after which a request is given up
    #[serde(rename = "connection-max-retries", default = "default_connection_max_retries")]
    pub connection_max_retries: u32,

    /// Failed attempts after which an attachment is no longer prefetched
    #[serde(rename = "max-download-retries", default = "default_max_download_retries")]
    pub max_download_retries: u32,

    /// Idle wait of the main loop before a failsafe rescan
    #[serde(rename = "idle-wait-secs", default = "default_idle_wait_secs")]
    pub idle_wait_secs: u64,

    /// Newest not-yet-downloaded records considered for prefetch
    #[serde(rename = "prefetch-candidates", default = "default_prefetch_candidates")]
    pub prefetch_candidates: usize,

    /// Fraction of total storage that must be free to prefetch at all
    #[serde(rename = "prefetch-min-free-ratio", default = "default_prefetch_ratio")]
    pub prefetch_min_free_ratio: f64,

    /// Fraction of total storage shared by all accounts' prefetched bytes
    #[serde(rename = "prefetch-max-storage-ratio", default = "default_prefetch_ratio")]
    pub prefetch_max_storage_ratio: f64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_per_account() -> usize {
    1
}

fn default_callback_timeout_ms() -> u64 {
    30_000
}

fn default_watchdog_interval_ms() -> u64 {
    20_000
}

fn default_connection_retry_delay_ms() -> u64 {
    10_000
}

fn default_connection_delay_threshold() -> u32 {
    5
}

fn default_connection_max_retries() -> u32 {
    10
}

fn default_max_download_retries() -> u32 {
    5
}

fn default_idle_wait_secs() -> u64 {
    30 * 60
}

fn default_prefetch_candidates() -> usize {
    25
}

fn default_prefetch_ratio() -> f64 {
    0.25
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_per_account: default_max_per_account(),
            callback_timeout_ms: default_callback_timeout_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            connection_retry_delay_ms: default_connection_retry_delay_ms(),
            connection_delay_threshold: default_connection_delay_threshold(),
            connection_max_retries: default_connection_max_retries(),
            max_download_retries: default_max_download_retries(),
            idle_wait_secs: default_idle_wait_secs(),
            prefetch_candidates: default_prefetch_candidates(),
            prefetch_min_free_ratio: default_prefetch_ratio(),
            prefetch_max_storage_ratio: default_prefetch_ratio(),
        }
    }
}

impl SchedulerConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn connection_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connection_retry_delay_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs(self.idle_wait_secs)
    }
}

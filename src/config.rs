//! Configuration types for classmirror

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for one sync run
///
/// All fields have sensible defaults; an empty JSON object deserializes to a
/// working configuration mirroring into `./downloads` with 3 workers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Destination root directory (default: "./downloads")
    ///
    /// Each course is mirrored under its own subdirectory of this root.
    #[serde(default = "default_dest_root")]
    pub dest_root: PathBuf,

    /// Number of concurrent download workers (default: 3)
    ///
    /// Kept small by default to respect remote rate limits.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Redownload every item regardless of unchanged version markers
    #[serde(default)]
    pub force: bool,

    /// Skip items with video file extensions
    #[serde(default)]
    pub skip_videos: bool,

    /// Start from an empty state manifest instead of refusing to run when the
    /// existing manifest is unreadable
    #[serde(default)]
    pub fresh_start: bool,

    /// How long the whole executor throttles after a rate-limit signal
    /// (default: 30 seconds)
    #[serde(default = "default_rate_limit_cooldown", with = "duration_serde")]
    pub rate_limit_cooldown: Duration,

    /// Retry behavior for transient per-item failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dest_root: default_dest_root(),
            workers: default_workers(),
            force: false,
            skip_videos: false,
            fresh_start: false,
            rate_limit_cooldown: default_rate_limit_cooldown(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_dest_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_workers() -> usize {
    3
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

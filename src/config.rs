//! Configuration types for skin-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote skin API settings (endpoints, headers, per-call timeouts)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Blessing Skin server (default: "https://littleskin.cn")
    ///
    /// Metadata is read from `{base_url}/texture/{id}` and textures from
    /// `{base_url}/textures/{hash}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Referer header sent with every request (None = omitted)
    #[serde(default = "default_referer")]
    pub referer: Option<String>,

    /// Timeout for a single metadata request (default: 10 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Timeout for a single texture request (default: 30 seconds)
    #[serde(default = "default_asset_timeout", with = "duration_serde")]
    pub asset_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            referer: default_referer(),
            request_timeout: default_request_timeout(),
            asset_timeout: default_asset_timeout(),
        }
    }
}

/// Retry configuration for transient network failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 2, i.e. 3 attempts)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (default: 1000)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries in milliseconds (default: 30000)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after every retry (default: 1.0 = fixed spacing)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Main configuration for [`Harvester`](crate::Harvester)
///
/// Every field has a default matching the behaviour of the LittleSkin crawler,
/// so `Config::default()` works out of the box against littleskin.cn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Output root; category folders are created beneath it (default: "./imgs")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Number of concurrent workers (default: 5)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Minimum spacing between two requests issued by the same worker, in milliseconds
    /// (default: 500)
    #[serde(default = "default_request_delay", with = "duration_ms_serde")]
    pub request_delay: Duration,

    /// Retry behaviour for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// How often a progress snapshot is emitted, in milliseconds (default: 1000)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            output_dir: default_output_dir(),
            workers: default_workers(),
            request_delay: default_request_delay(),
            retry: RetryConfig::default(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Check the settings the pipeline relies on
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers", "at least one worker is required"));
        }

        let url = url::Url::parse(&self.api.base_url).map_err(|e| {
            Error::config(
                "api.base_url",
                format!("invalid base URL '{}': {}", self.api.base_url, e),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(
                "api.base_url",
                format!("unsupported scheme '{}', expected http or https", url.scheme()),
            ));
        }

        if self.api.user_agent.trim().is_empty() {
            return Err(Error::config("api.user_agent", "user agent must not be empty"));
        }

        let multiplier = self.retry.backoff_multiplier;
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!(
                    "backoff multiplier must be between 1.0 and {MAX_BACKOFF_MULTIPLIER}, got {multiplier}"
                ),
            ));
        }

        if self.progress_interval.is_zero() {
            return Err(Error::config(
                "progress_interval",
                "progress interval must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Largest accepted `retry.backoff_multiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 16.0;

fn default_base_url() -> String {
    "https://littleskin.cn".to_string()
}

fn default_user_agent() -> String {
    concat!("skin-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_referer() -> Option<String> {
    Some("https://littleskin.cn/".to_string())
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_asset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("imgs")
}

fn default_workers() -> usize {
    5
}

fn default_request_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(1)
}

// Duration serialization helper (whole seconds)
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

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

//! Render Controller Configuration
//!
//! Loaded from a mounted YAML file. Every field has a default so a partial
//! file (or no file) still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Number of concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rate-limited retries before a group falls back to slow retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retries once `max_retries` is exhausted
    #[serde(default = "default_fallback_delay_seconds")]
    pub fallback_delay_seconds: u64,

    /// Per-item exponential backoff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Overall token bucket shared by all items
    #[serde(default)]
    pub bucket: BucketConfig,

    /// Controller name used for events
    #[serde(default = "default_reporter")]
    pub reporter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay_millis")]
    pub base_delay_millis: u64,

    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BucketConfig {
    #[serde(default = "default_qps")]
    pub qps: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_workers() -> usize {
    5
}

fn default_max_retries() -> u32 {
    // 5ms*2^(15-1) puts the last rate-limited retry at roughly 82s
    15
}

fn default_fallback_delay_seconds() -> u64 {
    60
}

fn default_base_delay_millis() -> u64 {
    5
}

fn default_max_delay_seconds() -> u64 {
    1000
}

fn default_qps() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    100
}

fn default_reporter() -> String {
    "render-controller".to_string()
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_millis: default_base_delay_millis(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            fallback_delay_seconds: default_fallback_delay_seconds(),
            backoff: BackoffConfig::default(),
            bucket: BucketConfig::default(),
            reporter: default_reporter(),
        }
    }
}

impl BackoffConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_millis)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }
}

impl RenderConfig {
    #[must_use]
    pub fn fallback_delay(&self) -> Duration {
        Duration::from_secs(self.fallback_delay_seconds)
    }

    /// Validate that the configuration describes a runnable controller
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.workers == 0 {
            return Err(anyhow::anyhow!("workers must be at least 1"));
        }
        if self.backoff.base_delay_millis == 0 {
            return Err(anyhow::anyhow!("backoff.baseDelayMillis must be positive"));
        }
        if self.backoff.max_delay() < self.backoff.base_delay() {
            return Err(anyhow::anyhow!(
                "backoff.maxDelaySeconds must not be below backoff.baseDelayMillis"
            ));
        }
        if self.bucket.qps.is_nan() || self.bucket.qps <= 0.0 || self.bucket.burst == 0 {
            return Err(anyhow::anyhow!("bucket.qps and bucket.burst must be positive"));
        }
        if self.reporter.trim().is_empty() {
            return Err(anyhow::anyhow!("reporter must not be empty"));
        }
        Ok(())
    }

    /// Load configuration from mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: RenderConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }
}

//! Configuration management for tollgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Main configuration for a tollgate deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Token cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Quota control-plane configuration, if one is used
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            limiter: LimiterSettings::default(),
            cache: CacheSettings::default(),
            upstream: None,
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Admissions allowed per window
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl LimiterSettings {
    /// The window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_requests_per_window() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

/// Token cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// How long cached tokens stay valid, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the sweeper removes expired entries, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl CacheSettings {
    /// The entry TTL as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// The sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Quota control-plane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the control-plane API
    pub base_url: String,

    /// API key exchanged for an access token
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl UpstreamConfig {
    /// The request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl TollgateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TollgateConfig =
            serde_yaml::from_str(&contents).map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce a zero or undefined rate.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.requests_per_window == 0 {
            return Err(TollgateError::Config(
                "limiter.requests_per_window must be positive".to_string(),
            ));
        }
        if self.limiter.window_secs == 0 {
            return Err(TollgateError::Config(
                "limiter.window_secs must be positive".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(TollgateError::Config(
                "cache.ttl_secs must be positive".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "cache.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if let Some(ref upstream) = self.upstream {
            if upstream.base_url.is_empty() {
                return Err(TollgateError::Config(
                    "upstream.base_url must be set".to_string(),
                ));
            }
            if upstream.api_key.is_empty() {
                return Err(TollgateError::Config(
                    "upstream.api_key must be set".to_string(),
                ));
            }
            if upstream.request_timeout_secs == 0 {
                return Err(TollgateError::Config(
                    "upstream.request_timeout_secs must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

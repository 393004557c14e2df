//! Configuration management for ratewarden.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ratelimit::Algorithm;

/// Prefix for environment overrides, e.g. `RATEWARDEN__LIMITER__MAX_REQUESTS`.
const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limits and algorithm for one limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Which algorithm to run
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Steady-state ceiling per interval
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window or refill period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Extra admissions tolerated above `max_requests`
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u64,

    /// Token balance a token bucket starts with
    #[serde(default)]
    pub initial_tokens: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            max_requests: default_max_requests(),
            interval_ms: default_interval_ms(),
            burst_limit: default_burst_limit(),
            initial_tokens: 0,
        }
    }
}

impl LimiterSettings {
    /// The interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_max_requests() -> u64 {
    5
}

fn default_interval_ms() -> u64 {
    60_000
}

fn default_burst_limit() -> u64 {
    2
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RatewardenConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RatewardenConfig =
            serde_yaml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then an optional file, then `RATEWARDEN__*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config: RatewardenConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject limits no algorithm can work with.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.max_requests == 0 {
            return Err(Error::Config("max_requests must be greater than zero".to_string()));
        }
        if self.limiter.interval_ms == 0 {
            return Err(Error::Config("interval_ms must be greater than zero".to_string()));
        }
        Ok(())
    }
}

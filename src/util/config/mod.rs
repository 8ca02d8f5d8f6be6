//! drainpool configuration system
//!
//! Pool settings come from several layers and are merged into one
//! [`PoolConfig`], which [`Pool::from_config`](crate::Pool::from_config)
//! turns into a pool. The runtime itself never reads the environment.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. DRAINPOOL_STAGE=test (forces limit = 1)
//! 2. CLI arguments
//! 3. Environment variables
//! 4. Config file (TOML)
//! 5. Default values
//! ```
//!
//! # File format
//!
//! ```toml
//! limit = 4
//! fail_fast = false
//!
//! [retry]
//! attempts = 3
//! base_delay_ms = 100
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::runtime::task::RetryPolicy;

/// Concurrency limit.
pub const ENV_LIMIT: &str = "DRAINPOOL_LIMIT";
/// Pool-wide retry attempts.
pub const ENV_RETRY_ATTEMPTS: &str = "DRAINPOOL_RETRY_ATTEMPTS";
/// Pool-wide retry base delay in milliseconds.
pub const ENV_RETRY_DELAY_MS: &str = "DRAINPOOL_RETRY_DELAY_MS";
/// Deployment stage; `test` forces a limit of 1.
pub const ENV_STAGE: &str = "DRAINPOOL_STAGE";

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    /// Maximum tasks running at once; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Cancel pending tasks on the first failure
    #[serde(default)]
    pub fail_fast: bool,
    /// Pool-wide retry override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total runs allowed, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// The retry policy this configuration describes.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigOverrides {
    pub limit: Option<usize>,
    pub attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub fail_fast: Option<bool>,
}

impl PoolConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::ParseError)
    }

    /// Render as a TOML document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_toml_str(&content)
    }

    /// Save as a TOML config file.
    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `DRAINPOOL_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `DRAINPOOL_*` variables looked up through `lookup`.
    pub fn apply_env_from<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = parse_env(&lookup, ENV_LIMIT)? {
            self.limit = Some(limit);
        }
        if let Some(attempts) = parse_env(&lookup, ENV_RETRY_ATTEMPTS)? {
            self.retry.get_or_insert_with(RetryConfig::default).attempts = attempts;
        }
        if let Some(delay) = parse_env(&lookup, ENV_RETRY_DELAY_MS)? {
            self.retry.get_or_insert_with(RetryConfig::default).base_delay_ms = delay;
        }
        self.apply_stage(&lookup);
        Ok(())
    }

    /// Apply command-line values.
    pub fn apply_overrides(
        &mut self,
        overrides: &ConfigOverrides,
    ) {
        if let Some(limit) = overrides.limit {
            self.limit = Some(limit);
        }
        if let Some(attempts) = overrides.attempts {
            self.retry.get_or_insert_with(RetryConfig::default).attempts = attempts;
        }
        if let Some(delay) = overrides.base_delay_ms {
            self.retry.get_or_insert_with(RetryConfig::default).base_delay_ms = delay;
        }
        if let Some(fail_fast) = overrides.fail_fast {
            self.fail_fast = fail_fast;
        }
    }

    fn apply_stage<F>(
        &mut self,
        lookup: &F,
    ) where
        F: Fn(&str) -> Option<String>,
    {
        if is_test_stage(lookup) && self.limit != Some(1) {
            debug!(previous = ?self.limit, "{}=test, forcing limit to 1", ENV_STAGE);
            self.limit = Some(1);
        }
    }

    /// Reject values the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "limit",
                reason: "must be at least 1",
            });
        }
        if self.retry.is_some_and(|retry| retry.attempts == 0) {
            return Err(ConfigError::InvalidValue {
                field: "retry.attempts",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Whether `DRAINPOOL_STAGE` is `test`, ignoring case.
pub fn is_test_stage<F>(lookup: &F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_STAGE).is_some_and(|stage| stage.trim().eq_ignore_ascii_case("test"))
}

fn parse_env<T, F>(
    lookup: &F,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

/// Merge every layer into one validated configuration, reading the
/// process environment.
pub fn load_layered(
    file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<PoolConfig, ConfigError> {
    load_layered_from(file, overrides, |key| std::env::var(key).ok())
}

/// Merge every layer into one validated configuration.
pub fn load_layered_from<F>(
    file: Option<&Path>,
    overrides: &ConfigOverrides,
    lookup: F,
) -> Result<PoolConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match file {
        Some(path) => PoolConfig::load(path)?,
        None => PoolConfig::default(),
    };
    config.apply_env_from(&lookup)?;
    config.apply_overrides(overrides);
    // the stage flag wins over the command line too
    config.apply_stage(&lookup);
    config.validate()?;
    Ok(config)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    ParseError(toml::de::Error),
    #[error("Config serialize error: {0}")]
    SerializeError(toml::ser::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests;

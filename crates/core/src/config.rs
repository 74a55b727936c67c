//! Engine configuration.
//! Every section has defaults, so a TOML file only needs the keys it changes.

use crate::dispatch::DispatchConfig;
use crate::limiter::LimiterConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the engine can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Language code sent to the provider.
    pub target_language: String,
    /// Suffix used when naming output files.
    pub language_tag: String,
    pub limiter: LimiterConfig,
    pub retry: RetryPolicy,
    pub dispatch: DispatchConfig,
    pub pipeline: PipelineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_language: "vi".to_string(),
            language_tag: "vietnamese".to_string(),
            limiter: LimiterConfig::default(),
            retry: RetryPolicy::default(),
            dispatch: DispatchConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };
        if self.target_language.trim().is_empty() {
            return invalid("target_language must not be empty");
        }
        if self.limiter.slots == 0 {
            return invalid("limiter.slots must be at least 1");
        }
        if self.limiter.max_requests_per_window == 0 {
            return invalid("limiter.max_requests_per_window must be at least 1");
        }
        if self.retry.max_retries == 0 {
            return invalid("retry.max_retries must be at least 1");
        }
        if self.retry.backoff_min_ms > self.retry.backoff_max_ms
            || self.retry.backoff_min_ms > self.retry.rate_limited_backoff_max_ms
        {
            return invalid("retry backoff minimum exceeds its maximum");
        }
        if self.dispatch.batch_size == 0 {
            return invalid("dispatch.batch_size must be at least 1");
        }
        Ok(())
    }
}

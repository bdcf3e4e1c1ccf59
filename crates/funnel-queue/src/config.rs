//! funnel.toml configuration for an update queue.

use std::path::Path;
use std::time::Duration;

use funnel_state::ApplyOptions;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Queue tunables. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name given to the processing thread.
    pub thread_name: String,
    /// Artificial work added to every operation, in milliseconds.
    pub processing_delay_ms: u64,
    /// How long a SLOW operation holds the processing thread, in milliseconds.
    pub slow_delay_ms: u64,
    /// Default wait for [`UpdateQueue::stop`](crate::UpdateQueue::stop), in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thread_name: "funnel-processor".to_string(),
            processing_delay_ms: 0,
            slow_delay_ms: 100,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl QueueConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn slow_delay(&self) -> Duration {
        Duration::from_millis(self.slow_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub(crate) fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            slow_delay: self.slow_delay(),
        }
    }
}

use std::path::Path;

use funnel_queue::QueueConfig;

pub mod run;
pub mod stress;

/// Load the queue config from `path`, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<QueueConfig> {
    match path {
        Some(path) => Ok(QueueConfig::from_file(path)?),
        None => Ok(QueueConfig::default()),
    }
}

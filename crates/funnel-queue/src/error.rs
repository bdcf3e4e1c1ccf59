//! Error types for the update queue.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned to submitters and lifecycle callers.
///
/// Operation-level failures are not here: they arrive as a resolved
/// [`ResultEnvelope`](crate::ResultEnvelope) whose outcome is `Err`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Shutdown has begun; the operation was never enqueued.
    #[error("update queue is closed")]
    Closed,

    /// The operation was accepted but its completion was dropped unresolved.
    #[error("operation {0} was abandoned before it was processed")]
    Abandoned(Uuid),

    #[error("failed to spawn processing thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures caught at the processing loop boundary, outside any single
/// command handler. Reported through `on_error`; the loop keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    #[error("processing step for operation {operation_id} (seq {sequence}) panicked: {message}")]
    StepPanicked {
        operation_id: Uuid,
        sequence: u64,
        message: String,
    },
}

/// Errors loading a [`QueueConfig`](crate::QueueConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

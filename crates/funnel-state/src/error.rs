//! Error types for command parsing and application.

use thiserror::Error;

/// Result type alias for command handlers.
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors produced while parsing or applying a single command.
///
/// These are always local to one operation: the queue turns them into a
/// failed result for the submitting caller and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unsupported operation kind: {0}")]
    UnsupportedKind(String),

    #[error("{kind} operation requires '{field}'")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("invalid '{field}' for {kind}: {reason}")]
    InvalidField {
        kind: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("{kind} payload must be an object")]
    MalformedPayload { kind: &'static str },

    #[error("value at '{key}' is not numeric: {value}")]
    NotNumeric { key: String, value: String },

    #[error("integer overflow incrementing '{key}'")]
    Overflow { key: String },

    #[error("{0}")]
    Simulated(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

//! Success payloads returned by command handlers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a successfully applied command produced.
///
/// Absent keys are always reported as [`CommandOutput::Missing`], both for a
/// top-level GET and for a GET inside a BATCH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CommandOutput {
    /// SET stored `value` under `key`.
    Set { key: String, value: Value },
    /// GET found a value.
    Found(Value),
    /// GET found nothing under the key.
    Missing,
    /// INCREMENT produced this new value.
    Counter(i64),
    /// DELETE ran; `existed` tells whether anything was removed.
    Deleted { key: String, existed: bool },
    /// Per-step outputs of a BATCH, in step order.
    Batch(Vec<CommandOutput>),
    /// Placeholder for a BATCH step whose type is not allowed there.
    Skipped { kind: String },
    Message(String),
}

impl CommandOutput {
    /// The value carried by a GET or INCREMENT result, if any.
    pub fn as_value(&self) -> Option<Value> {
        match self {
            CommandOutput::Found(value) => Some(value.clone()),
            CommandOutput::Counter(n) => Some(Value::from(*n)),
            _ => None,
        }
    }
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::Set { key, value } => write!(f, "Set {key} = {value}"),
            CommandOutput::Found(value) => write!(f, "{value}"),
            CommandOutput::Missing => f.write_str("(missing)"),
            CommandOutput::Counter(n) => write!(f, "{n}"),
            CommandOutput::Deleted { key, existed: true } => write!(f, "Deleted {key}"),
            CommandOutput::Deleted { key, existed: false } => write!(f, "Key {key} not found"),
            CommandOutput::Batch(outputs) => {
                f.write_str("[")?;
                for (i, output) in outputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{output}")?;
                }
                f.write_str("]")
            }
            CommandOutput::Skipped { kind } => write!(f, "Unknown operation: {kind}"),
            CommandOutput::Message(message) => f.write_str(message),
        }
    }
}

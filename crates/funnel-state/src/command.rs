//! Typed commands: one variant per operation kind.
//!
//! Callers submit a kind string plus a JSON payload. The processing loop
//! turns that pair into a [`Command`] with [`Command::parse`]; every
//! missing-field or wrong-type problem becomes a [`CommandError`] instead of
//! reaching the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{CommandError, CommandResult};

/// Operation kind tag, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Set,
    Get,
    Increment,
    Delete,
    Batch,
    Slow,
    Error,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Set => "SET",
            CommandKind::Get => "GET",
            CommandKind::Increment => "INCREMENT",
            CommandKind::Delete => "DELETE",
            CommandKind::Batch => "BATCH",
            CommandKind::Slow => "SLOW",
            CommandKind::Error => "ERROR",
        }
    }

    /// Kinds that may appear as a step inside a BATCH.
    pub fn is_batchable(self) -> bool {
        matches!(
            self,
            CommandKind::Set | CommandKind::Get | CommandKind::Increment | CommandKind::Delete
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SET" => Ok(CommandKind::Set),
            "GET" => Ok(CommandKind::Get),
            "INCREMENT" => Ok(CommandKind::Increment),
            "DELETE" => Ok(CommandKind::Delete),
            "BATCH" => Ok(CommandKind::Batch),
            "SLOW" => Ok(CommandKind::Slow),
            "ERROR" => Ok(CommandKind::Error),
            _ => Err(CommandError::UnsupportedKind(s.to_string())),
        }
    }
}

/// A validated mutation (or read) against the state store.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: String, value: Value },
    Get { key: String },
    Increment { key: String, delta: i64 },
    Delete { key: String },
    Batch { steps: Vec<BatchStep> },
    Slow,
    Error,
}

/// One entry of a BATCH.
///
/// `Apply` only ever wraps SET, GET, INCREMENT or DELETE. Any other `type`
/// is kept as `Unsupported` and answered with a placeholder when applied.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStep {
    Apply(Command),
    Unsupported(String),
}

impl Command {
    /// Parse a kind string and its payload.
    pub fn parse(kind: &str, payload: &Value) -> CommandResult<Self> {
        let kind: CommandKind = kind.parse()?;
        Self::parse_kind(kind, payload)
    }

    /// Parse a payload for an already-resolved kind.
    pub fn parse_kind(kind: CommandKind, payload: &Value) -> CommandResult<Self> {
        match kind {
            CommandKind::Set => {
                let fields = object(kind, payload)?;
                let key = key_field(kind, fields)?;
                let value = fields.get("value").cloned().ok_or(CommandError::MissingField {
                    kind: kind.as_str(),
                    field: "value",
                })?;
                Ok(Command::Set { key, value })
            }
            CommandKind::Get => Ok(Command::Get {
                key: key_field(kind, object(kind, payload)?)?,
            }),
            CommandKind::Increment => {
                let fields = object(kind, payload)?;
                let key = key_field(kind, fields)?;
                let delta = match fields.get("value") {
                    None => 1,
                    Some(v) => coerce_integer(v).ok_or_else(|| CommandError::InvalidField {
                        kind: kind.as_str(),
                        field: "value",
                        reason: format!("expected an integer, got {v}"),
                    })?,
                };
                Ok(Command::Increment { key, delta })
            }
            CommandKind::Delete => Ok(Command::Delete {
                key: key_field(kind, object(kind, payload)?)?,
            }),
            CommandKind::Batch => {
                let fields = object(kind, payload)?;
                let operations = fields
                    .get("operations")
                    .ok_or(CommandError::MissingField {
                        kind: kind.as_str(),
                        field: "operations",
                    })?
                    .as_array()
                    .ok_or_else(|| CommandError::InvalidField {
                        kind: kind.as_str(),
                        field: "operations",
                        reason: "expected an array".to_string(),
                    })?;
                let steps = operations
                    .iter()
                    .enumerate()
                    .filter_map(|(index, op)| BatchStep::parse(index, op).transpose())
                    .collect::<CommandResult<Vec<_>>>()?;
                Ok(Command::Batch { steps })
            }
            CommandKind::Slow => Ok(Command::Slow),
            CommandKind::Error => Ok(Command::Error),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Set { .. } => CommandKind::Set,
            Command::Get { .. } => CommandKind::Get,
            Command::Increment { .. } => CommandKind::Increment,
            Command::Delete { .. } => CommandKind::Delete,
            Command::Batch { .. } => CommandKind::Batch,
            Command::Slow => CommandKind::Slow,
            Command::Error => CommandKind::Error,
        }
    }

    /// Render the payload that [`Command::parse_kind`] would accept for this command.
    pub fn to_payload(&self) -> Value {
        match self {
            Command::Set { key, value } => json!({ "key": key, "value": value }),
            Command::Get { key } | Command::Delete { key } => json!({ "key": key }),
            Command::Increment { key, delta } => json!({ "key": key, "value": delta }),
            Command::Batch { steps } => json!({
                "operations": steps.iter().map(BatchStep::to_payload).collect::<Vec<_>>(),
            }),
            Command::Slow | Command::Error => Value::Null,
        }
    }
}

impl BatchStep {
    /// Parse one BATCH entry. Entries that are not objects are dropped.
    fn parse(index: usize, op: &Value) -> CommandResult<Option<Self>> {
        let Some(fields) = op.as_object() else {
            debug!(index, entry = %op, "skipping non-object batch entry");
            return Ok(None);
        };
        let ty = match fields.get("type") {
            Some(Value::String(ty)) => ty.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(CommandError::InvalidField {
                    kind: CommandKind::Batch.as_str(),
                    field: "operations",
                    reason: format!("entry {index} is missing 'type'"),
                });
            }
        };

        let step = match ty.parse::<CommandKind>() {
            Ok(kind) if kind.is_batchable() => BatchStep::Apply(Command::parse_kind(kind, op)?),
            _ => BatchStep::Unsupported(ty),
        };
        Ok(Some(step))
    }

    fn to_payload(&self) -> Value {
        match self {
            BatchStep::Apply(command) => {
                let mut payload = command.to_payload();
                if let Value::Object(fields) = &mut payload {
                    fields.insert("type".to_string(), json!(command.kind().as_str()));
                }
                payload
            }
            BatchStep::Unsupported(ty) => json!({ "type": ty }),
        }
    }
}

fn object(kind: CommandKind, payload: &Value) -> CommandResult<&Map<String, Value>> {
    payload.as_object().ok_or(CommandError::MalformedPayload {
        kind: kind.as_str(),
    })
}

/// Keys are strings; numbers and booleans are accepted in their text form.
fn key_field(kind: CommandKind, fields: &Map<String, Value>) -> CommandResult<String> {
    match fields.get("key") {
        None => Err(CommandError::MissingField {
            kind: kind.as_str(),
            field: "key",
        }),
        Some(Value::String(key)) => Ok(key.clone()),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
        Some(other) => Err(CommandError::InvalidField {
            kind: kind.as_str(),
            field: "key",
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Integer view of a JSON value: integers, whole floats, and numeric strings.
pub(crate) fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
            (f.fract() == 0.0 && in_range).then_some(f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_is_case_insensitive() {
        assert_eq!("set".parse::<CommandKind>().unwrap(), CommandKind::Set);
        assert_eq!("Increment".parse::<CommandKind>().unwrap(), CommandKind::Increment);
        assert_eq!(" DELETE ".parse::<CommandKind>().unwrap(), CommandKind::Delete);
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = Command::parse("FROBNICATE", &json!({})).unwrap_err();
        assert_eq!(err, CommandError::UnsupportedKind("FROBNICATE".to_string()));
    }

    #[test]
    fn set_requires_key_and_value() {
        let err = Command::parse("SET", &json!({ "key": "a" })).unwrap_err();
        assert_eq!(
            err,
            CommandError::MissingField {
                kind: "SET",
                field: "value"
            }
        );

        let err = Command::parse("SET", &json!({ "value": 1 })).unwrap_err();
        assert!(matches!(err, CommandError::MissingField { field: "key", .. }));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        let err = Command::parse("GET", &json!("a")).unwrap_err();
        assert_eq!(err, CommandError::MalformedPayload { kind: "GET" });
    }

    #[test]
    fn numeric_key_uses_text_form() {
        let cmd = Command::parse("GET", &json!({ "key": 42 })).unwrap();
        assert_eq!(cmd, Command::Get { key: "42".to_string() });
    }

    #[test]
    fn increment_defaults_to_one() {
        let cmd = Command::parse("INCREMENT", &json!({ "key": "c" })).unwrap();
        assert_eq!(cmd, Command::Increment { key: "c".to_string(), delta: 1 });

        let cmd = Command::parse("INCREMENT", &json!({ "key": "c", "value": "5" })).unwrap();
        assert_eq!(cmd, Command::Increment { key: "c".to_string(), delta: 5 });
    }

    #[test]
    fn increment_rejects_fractional_delta() {
        let err = Command::parse("INCREMENT", &json!({ "key": "c", "value": 1.5 })).unwrap_err();
        assert!(matches!(err, CommandError::InvalidField { field: "value", .. }));
    }

    #[test]
    fn batch_keeps_unsupported_steps() {
        let payload = json!({
            "operations": [
                { "type": "set", "key": "a", "value": 1 },
                { "type": "BATCH", "operations": [] },
                { "type": "teleport" },
            ]
        });
        let Command::Batch { steps } = Command::parse("BATCH", &payload).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            BatchStep::Apply(Command::Set {
                key: "a".to_string(),
                value: json!(1)
            })
        );
        assert_eq!(steps[1], BatchStep::Unsupported("BATCH".to_string()));
        assert_eq!(steps[2], BatchStep::Unsupported("teleport".to_string()));
    }

    #[test]
    fn batch_step_without_type_fails_whole_batch() {
        let payload = json!({ "operations": [{ "key": "a" }] });
        let err = Command::parse("BATCH", &payload).unwrap_err();
        assert!(matches!(err, CommandError::InvalidField { field: "operations", .. }));
    }

    #[test]
    fn batch_tolerates_odd_entries() {
        let payload = json!({
            "operations": [
                { "type": 5 },
                "junk",
                { "type": "SET", "key": "a", "value": 1 },
                42,
            ]
        });
        let Command::Batch { steps } = Command::parse("BATCH", &payload).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(
            steps,
            vec![
                BatchStep::Unsupported("5".to_string()),
                BatchStep::Apply(Command::Set {
                    key: "a".to_string(),
                    value: json!(1)
                }),
            ]
        );
    }

    #[test]
    fn payload_rendering_parses_back() {
        let cmd = Command::Batch {
            steps: vec![
                BatchStep::Apply(Command::Increment { key: "n".to_string(), delta: 3 }),
                BatchStep::Unsupported("SLOW".to_string()),
            ],
        };
        let parsed = Command::parse_kind(cmd.kind(), &cmd.to_payload()).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn coerce_integer_values() {
        assert_eq!(coerce_integer(&json!(7)), Some(7));
        assert_eq!(coerce_integer(&json!(7.0)), Some(7));
        assert_eq!(coerce_integer(&json!(" -3 ")), Some(-3));
        assert_eq!(coerce_integer(&json!(7.25)), None);
        assert_eq!(coerce_integer(&json!("seven")), None);
        assert_eq!(coerce_integer(&json!([1])), None);
    }
}

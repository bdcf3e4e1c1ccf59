//! StateStore: the key/value map and process log mutated by the update queue.
//!
//! Entries and log live behind one `RwLock`. The single writer holds the
//! write lock for exactly one command at a time, so readers never see half of
//! a BATCH. SLOW commands sleep without holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::command::{BatchStep, Command, coerce_integer};
use crate::error::{CommandError, CommandResult};
use crate::output::CommandOutput;

/// Default hold time for a SLOW command.
pub const DEFAULT_SLOW_DELAY: Duration = Duration::from_millis(100);

const SLOW_MESSAGE: &str = "Slow operation completed";
const SIMULATED_ERROR: &str = "Simulated error for testing";

/// Tunables for [`StateStore::apply`].
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// How long a SLOW command holds the caller.
    pub slow_delay: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            slow_delay: DEFAULT_SLOW_DELAY,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, Value>,
    log: Vec<String>,
}

/// Shared in-memory state: entries plus an append-only log.
#[derive(Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command. Must only be called from the single writer.
    pub fn apply(&self, command: &Command, options: &ApplyOptions) -> CommandResult<CommandOutput> {
        match command {
            Command::Slow => {
                std::thread::sleep(options.slow_delay);
                Ok(CommandOutput::Message(SLOW_MESSAGE.to_string()))
            }
            Command::Error => Err(CommandError::Simulated(SIMULATED_ERROR.to_string())),
            Command::Batch { steps } => {
                let mut inner = self.write();
                let entries = &mut inner.entries;
                let outputs = steps
                    .iter()
                    .map(|step| match step {
                        BatchStep::Apply(command) if command.kind().is_batchable() => {
                            apply_entry(entries, command)
                        }
                        BatchStep::Apply(command) => Ok(CommandOutput::Skipped {
                            kind: command.kind().to_string(),
                        }),
                        BatchStep::Unsupported(kind) => Ok(CommandOutput::Skipped {
                            kind: kind.clone(),
                        }),
                    })
                    .collect::<CommandResult<Vec<_>>>()?;
                debug!(steps = outputs.len(), "batch applied");
                Ok(CommandOutput::Batch(outputs))
            }
            single => {
                let mut inner = self.write();
                apply_entry(&mut inner.entries, single)
            }
        }
    }

    /// Append one record to the process log.
    pub fn append_log(&self, line: impl Into<String>) {
        self.write().log.push(line.into());
    }

    /// Copy of all entries.
    pub fn snapshot_entries(&self) -> HashMap<String, Value> {
        self.read().entries.clone()
    }

    /// Copy of the process log, oldest first.
    pub fn snapshot_log(&self) -> Vec<String> {
        self.read().log.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().entries.get(key).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_len(&self) -> usize {
        self.read().log.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply a SET, GET, INCREMENT or DELETE to the map.
fn apply_entry(
    entries: &mut HashMap<String, Value>,
    command: &Command,
) -> CommandResult<CommandOutput> {
    match command {
        Command::Set { key, value } => {
            entries.insert(key.clone(), value.clone());
            debug!(%key, "entry set");
            Ok(CommandOutput::Set {
                key: key.clone(),
                value: value.clone(),
            })
        }
        Command::Get { key } => Ok(entries
            .get(key)
            .cloned()
            .map_or(CommandOutput::Missing, CommandOutput::Found)),
        Command::Increment { key, delta } => increment(entries, key, *delta),
        Command::Delete { key } => {
            let existed = entries.remove(key).is_some();
            debug!(%key, existed, "entry deleted");
            Ok(CommandOutput::Deleted {
                key: key.clone(),
                existed,
            })
        }
        other => Ok(CommandOutput::Skipped {
            kind: other.kind().to_string(),
        }),
    }
}

fn increment(
    entries: &mut HashMap<String, Value>,
    key: &str,
    delta: i64,
) -> CommandResult<CommandOutput> {
    let current = match entries.get(key) {
        None | Some(Value::Null) => 0,
        Some(value) => coerce_integer(value).ok_or_else(|| CommandError::NotNumeric {
            key: key.to_string(),
            value: value.to_string(),
        })?,
    };
    let next = current
        .checked_add(delta)
        .ok_or_else(|| CommandError::Overflow {
            key: key.to_string(),
        })?;
    entries.insert(key.to_string(), Value::from(next));
    Ok(CommandOutput::Counter(next))
}

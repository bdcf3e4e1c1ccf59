//! funnel-state: the in-memory state store driven by the update queue.
//!
//! Holds a string-keyed map of JSON values and an append-only process log.
//! Mutations arrive as [`Command`]s, a sum type with one variant per
//! operation kind, parsed from a kind string and a JSON payload.
//!
//! # Architecture
//!
//! ```text
//! (kind, payload) ──► Command::parse ──► StateStore::apply ──► CommandOutput
//!                          │                    │
//!                          └── CommandError ◄───┘
//! ```
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<RwLock<..>>`).
//! Only one owner is expected to call [`StateStore::apply`]; everyone else
//! reads through the snapshot accessors, which copy under a short read lock.

pub mod command;
pub mod error;
pub mod output;
pub mod store;

pub use command::{BatchStep, Command, CommandKind};
pub use error::{CommandError, CommandResult};
pub use output::CommandOutput;
pub use store::{ApplyOptions, StateStore};

/// Values held by the store.
pub use serde_json::Value;

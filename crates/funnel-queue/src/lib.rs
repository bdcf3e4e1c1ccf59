//! funnel-queue: a singular update queue.
//!
//! Any number of threads or tasks submit operations concurrently; exactly one
//! processing thread applies them, in arrival order, to a shared
//! [`StateStore`](funnel_state::StateStore). Each submitter gets a
//! [`Completion`] that resolves once its own operation has been applied.
//!
//! # Architecture
//!
//! ```text
//! caller ─► UpdateQueue::enqueue ─► mpsc (unbounded) ─► processing thread
//!                 │                                        │
//!                 └── Completion ◄── oneshot ◄── ResultEnvelope
//!                                                          │
//!                                      StateStore::apply ◄─┤
//!                                      on_log / on_processed hooks
//! ```
//!
//! # Failure model
//!
//! A failing operation (bad payload, unknown kind, handler error or panic)
//! resolves its own completion with an `Err` outcome and consumes a sequence
//! number. Nothing else is affected. Submitting after shutdown has begun
//! fails immediately with [`QueueError::Closed`].

pub mod config;
pub mod envelope;
pub mod error;
pub mod observer;
pub mod queue;
pub mod worker;

pub use config::QueueConfig;
pub use envelope::{Completion, OperationEnvelope, ResultEnvelope};
pub use error::{ConfigError, LoopError, QueueError, QueueResult};
pub use observer::{ErrorHook, LogHook, ProcessedHook};
pub use queue::{QueueStatistics, ShutdownOutcome, UpdateQueue};
pub use worker::LoopState;

pub use funnel_state::{BatchStep, Command, CommandError, CommandKind, CommandOutput, Value};

//! The processing loop: sole consumer of the ingress channel.
//!
//! ```text
//!   Idle ──(envelope received)──► Draining ──(channel empty)──► Idle
//!     │                               │
//!     └──(shutdown requested)──► Stopping ──(backlog drained)──► Stopped
//! ```
//!
//! Runs on one dedicated OS thread. Everything that touches the state store's
//! write side happens here, one envelope at a time, in channel order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use funnel_state::{ApplyOptions, Command, CommandError, CommandOutput, CommandResult, StateStore};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::config::QueueConfig;
use crate::envelope::{OperationEnvelope, Pending, ResultEnvelope};
use crate::error::LoopError;
use crate::observer::{Observers, panic_message};

/// Where the processing loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting for work.
    Idle,
    /// Processing envelopes until the channel is empty.
    Draining,
    /// Shutdown requested; finishing the backlog.
    Stopping,
    /// Terminal.
    Stopped,
}

/// State shared between the controller and the processing thread.
pub(crate) struct Shared {
    pub(crate) store: StateStore,
    pub(crate) observers: Observers,
    /// Envelopes accepted but not yet dequeued.
    pub(crate) pending: AtomicUsize,
    /// Highest sequence number handed out so far.
    pub(crate) processed: AtomicU64,
    pub(crate) running: AtomicBool,
    pub(crate) state: watch::Sender<LoopState>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            store: StateStore::new(),
            observers: Observers::default(),
            pending: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            running: AtomicBool::new(false),
            state,
        }
    }

    /// Move to `next`. `Stopped` is terminal and `Stopping` only leads to `Stopped`.
    pub(crate) fn transition(&self, next: LoopState) {
        self.state.send_if_modified(|current| {
            let allowed = match *current {
                LoopState::Stopped => false,
                LoopState::Stopping => next == LoopState::Stopped,
                other => other != next,
            };
            if allowed {
                *current = next;
            }
            allowed
        });
    }

    pub(crate) fn state(&self) -> LoopState {
        *self.state.borrow()
    }
}

/// Publishes `Stopped` when the loop exits, including by unwinding.
struct StopGuard(Arc<Shared>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.0.transition(LoopState::Stopped);
    }
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    ingress: mpsc::UnboundedReceiver<Pending>,
    options: ApplyOptions,
    processing_delay: Duration,
    /// Last sequence number assigned. Only this thread touches it.
    sequence: u64,
    #[cfg(test)]
    fail_at: Option<u64>,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        ingress: mpsc::UnboundedReceiver<Pending>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            shared,
            ingress,
            options: config.apply_options(),
            processing_delay: config.processing_delay(),
            sequence: 0,
            #[cfg(test)]
            fail_at: None,
        }
    }

    /// Run until the ingress channel is closed and empty.
    pub(crate) fn run(mut self) {
        let _guard = StopGuard(self.shared.clone());
        self.shared.running.store(true, Ordering::SeqCst);
        info!("processing loop started");
        self.shared.observers.log("Processing loop started");

        // `blocking_recv` returns None only once every sender is gone and the
        // buffer is empty, so the backlog is always drained before exit.
        while let Some(first) = self.ingress.blocking_recv() {
            self.shared.transition(LoopState::Draining);
            let mut next = Some(first);
            while let Some(pending) = next {
                self.step(pending);
                next = self.ingress.try_recv().ok();
            }
            self.shared.transition(LoopState::Idle);
        }

        info!(total = self.sequence, "processing loop stopped");
        self.shared.observers.log("Processing loop stopped");
    }

    /// Process one envelope. Nothing escapes this boundary.
    fn step(&mut self, pending: Pending) {
        self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        self.sequence += 1;
        let sequence = self.sequence;
        let operation_id = pending.operation.id;

        let stepped = catch_unwind(AssertUnwindSafe(|| self.process(pending, sequence)));
        if let Err(panic) = stepped {
            self.shared.processed.store(sequence, Ordering::SeqCst);
            let err = LoopError::StepPanicked {
                operation_id,
                sequence,
                message: panic_message(panic.as_ref()),
            };
            error!(%err, "processing step failed");
            self.shared.observers.error(&err);
        }
    }

    fn process(&self, pending: Pending, sequence: u64) {
        let Pending {
            operation,
            completion,
        } = pending;

        #[cfg(test)]
        if self.fail_at == Some(sequence) {
            panic!("injected step failure");
        }

        if !self.processing_delay.is_zero() {
            std::thread::sleep(self.processing_delay);
        }

        let result = ResultEnvelope {
            operation_id: operation.id,
            outcome: self.execute(&operation),
            sequence,
            processed_at: Utc::now(),
        };

        match &result.outcome {
            Ok(_) => debug!(id = %operation.id, kind = %operation.kind, seq = sequence, "operation applied"),
            Err(err) => debug!(id = %operation.id, kind = %operation.kind, seq = sequence, %err, "operation failed"),
        }

        // Record before resolving so a caller that wakes up already sees it.
        let line = log_line(&operation, &result);
        self.shared.store.append_log(line.clone());
        self.shared.processed.store(sequence, Ordering::SeqCst);

        if completion.send(result.clone()).is_err() {
            debug!(id = %operation.id, "submitter dropped its completion handle");
        }

        self.shared.observers.log(&line);
        self.shared.observers.processed(&operation, &result);
    }

    fn execute(&self, operation: &OperationEnvelope) -> CommandResult<CommandOutput> {
        let command = Command::parse(&operation.kind, &operation.payload)?;
        catch_unwind(AssertUnwindSafe(|| self.shared.store.apply(&command, &self.options)))
            .unwrap_or_else(|panic| Err(CommandError::Panicked(panic_message(panic.as_ref()))))
    }
}

/// `[seq] KIND by client at HH:MM:SS.fff`, with the error appended on failure.
fn log_line(operation: &OperationEnvelope, result: &ResultEnvelope) -> String {
    let mut line = format!(
        "[{}] {} by {} at {}",
        result.sequence,
        operation.kind.trim().to_ascii_uppercase(),
        operation.client_tag,
        result.processed_at.format("%H:%M:%S%.3f"),
    );
    if let Some(err) = result.error() {
        line.push_str(" failed: ");
        line.push_str(&err.to_string());
    }
    line
}

//! Observer hooks fired synchronously from the processing thread.
//!
//! Hooks must be quick and must not block. A hook that panics is caught and
//! logged; it never reaches the processing loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::envelope::{OperationEnvelope, ResultEnvelope};
use crate::error::LoopError;

/// Receives every log line the processing loop emits.
pub type LogHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives loop-level failures.
pub type ErrorHook = Arc<dyn Fn(&LoopError) + Send + Sync>;

/// Receives each operation together with its result, after completion.
pub type ProcessedHook = Arc<dyn Fn(&OperationEnvelope, &ResultEnvelope) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Observers {
    log: RwLock<Vec<LogHook>>,
    error: RwLock<Vec<ErrorHook>>,
    processed: RwLock<Vec<ProcessedHook>>,
}

impl Observers {
    pub(crate) fn add_log(&self, hook: LogHook) {
        push(&self.log, hook);
    }

    pub(crate) fn add_error(&self, hook: ErrorHook) {
        push(&self.error, hook);
    }

    pub(crate) fn add_processed(&self, hook: ProcessedHook) {
        push(&self.processed, hook);
    }

    pub(crate) fn log(&self, message: &str) {
        for hook in listed(&self.log) {
            isolate("on_log", || hook(message));
        }
    }

    pub(crate) fn error(&self, err: &LoopError) {
        for hook in listed(&self.error) {
            isolate("on_error", || hook(err));
        }
    }

    pub(crate) fn processed(&self, operation: &OperationEnvelope, result: &ResultEnvelope) {
        for hook in listed(&self.processed) {
            isolate("on_processed", || hook(operation, result));
        }
    }
}

fn push<T>(hooks: &RwLock<Vec<T>>, hook: T) {
    hooks
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(hook);
}

// Hooks are called on a copy of the list so a hook may register another.
fn listed<T: Clone>(hooks: &RwLock<Vec<T>>) -> Vec<T> {
    hooks.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn isolate(hook: &'static str, call: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(call)) {
        warn!(hook, reason = %panic_message(panic.as_ref()), "observer panicked");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

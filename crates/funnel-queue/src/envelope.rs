//! Operation and result envelopes, and the completion handle callers await.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use funnel_state::{CommandError, CommandOutput};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// One requested operation, as accepted by the queue.
///
/// Immutable once enqueued. Observers receive it alongside the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationEnvelope {
    pub id: Uuid,
    /// Kind tag exactly as submitted.
    pub kind: String,
    pub payload: Value,
    /// Free-form submitter tag; diagnostics only.
    pub client_tag: String,
    pub submitted_at: DateTime<Utc>,
}

impl OperationEnvelope {
    pub(crate) fn new(kind: String, payload: Value, client_tag: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            client_tag,
            submitted_at: Utc::now(),
        }
    }
}

/// Outcome of one processed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub operation_id: Uuid,
    pub outcome: Result<CommandOutput, CommandError>,
    /// Position in the processing order, starting at 1, gap-free.
    pub sequence: u64,
    pub processed_at: DateTime<Utc>,
}

impl ResultEnvelope {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&CommandOutput> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&CommandError> {
        self.outcome.as_ref().err()
    }
}

impl Serialize for ResultEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ResultEnvelope", 6)?;
        s.serialize_field("operation_id", &self.operation_id)?;
        s.serialize_field("success", &self.is_success())?;
        s.serialize_field("value", &self.value())?;
        s.serialize_field("error", &self.error().map(ToString::to_string))?;
        s.serialize_field("sequence", &self.sequence)?;
        s.serialize_field("processed_at", &self.processed_at)?;
        s.end()
    }
}

/// An enqueued operation paired with its write-once completion.
pub(crate) struct Pending {
    pub(crate) operation: OperationEnvelope,
    pub(crate) completion: oneshot::Sender<ResultEnvelope>,
}

impl Pending {
    pub(crate) fn new(operation: OperationEnvelope) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion {
            operation_id: operation.id,
            rx,
        };
        (
            Self {
                operation,
                completion: tx,
            },
            completion,
        )
    }
}

/// Handle that resolves once the operation has been applied.
///
/// Await it from async code, or call [`Completion::wait`] from a plain thread.
#[derive(Debug)]
pub struct Completion {
    operation_id: Uuid,
    rx: oneshot::Receiver<ResultEnvelope>,
}

impl Completion {
    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Block the current thread until the result arrives.
    ///
    /// Panics if called from within an async runtime; await the handle there.
    pub fn wait(self) -> QueueResult<ResultEnvelope> {
        let id = self.operation_id;
        self.rx.blocking_recv().map_err(|_| QueueError::Abandoned(id))
    }
}

impl Future for Completion {
    type Output = QueueResult<ResultEnvelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.operation_id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| QueueError::Abandoned(id)))
    }
}

/// Tag used when the submitter gives none: the thread name, else its id.
pub(crate) fn current_client_tag() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

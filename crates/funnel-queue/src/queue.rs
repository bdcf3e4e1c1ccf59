//! UpdateQueue: the public controller.
//!
//! Accepts submissions from any number of threads or tasks, hands them to the
//! single processing thread over an unbounded channel, and exposes read-only
//! snapshots of the state it owns.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use funnel_state::{Command, Value};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::envelope::{
    Completion, OperationEnvelope, Pending, ResultEnvelope, current_client_tag,
};
use crate::error::{LoopError, QueueError, QueueResult};
use crate::worker::{LoopState, Shared, Worker};

/// Point-in-time counters. Best effort; never blocks the processing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatistics {
    /// Accepted operations not yet picked up by the processing thread.
    pub queue_length: usize,
    /// Operations processed so far, failed ones included.
    pub total_processed: u64,
    pub is_running: bool,
    /// Number of entries in the state store.
    pub state_size: usize,
    pub loop_state: LoopState,
}

/// How a [`UpdateQueue::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// The processing loop drained its backlog and exited.
    Clean,
    /// The loop was still running when the timeout expired. It is left to
    /// finish on its own.
    TimedOut,
}

impl ShutdownOutcome {
    pub fn is_clean(self) -> bool {
        self == ShutdownOutcome::Clean
    }
}

/// Serializes all state mutations through one processing thread.
pub struct UpdateQueue {
    config: QueueConfig,
    shared: Arc<Shared>,
    /// `None` once shutdown has begun.
    ingress: RwLock<Option<mpsc::UnboundedSender<Pending>>>,
    /// Taken by `start`, or dropped by a shutdown that precedes it.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Pending>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateQueue {
    /// Create a queue. Submissions are buffered until [`UpdateQueue::start`].
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            shared: Arc::new(Shared::new()),
            ingress: RwLock::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spawn the processing thread. Later calls are ignored.
    pub fn start(&self) -> QueueResult<()> {
        let Some(rx) = lock(&self.receiver).take() else {
            warn!("update queue already started or shut down; ignoring start");
            return Ok(());
        };

        let worker = Worker::new(self.shared.clone(), rx, &self.config);
        let spawned = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || worker.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => return Err(self.abort_start(err)),
        };
        *lock(&self.thread) = Some(handle);

        info!(thread = %self.config.thread_name, "update queue started");
        Ok(())
    }

    /// Enqueue an operation without waiting for it.
    ///
    /// Never blocks on the processing thread. The returned [`Completion`]
    /// resolves once the operation has been applied. Fails with
    /// [`QueueError::Closed`] once shutdown has begun.
    pub fn enqueue(
        &self,
        kind: impl Into<String>,
        payload: Value,
        client_tag: Option<&str>,
    ) -> QueueResult<Completion> {
        let ingress = self.ingress.read().unwrap_or_else(PoisonError::into_inner);
        let sender = ingress.as_ref().ok_or(QueueError::Closed)?;

        let client_tag = client_tag.map_or_else(current_client_tag, str::to_string);
        let operation = OperationEnvelope::new(kind.into(), payload, client_tag);
        debug!(
            id = %operation.id,
            kind = %operation.kind,
            client = %operation.client_tag,
            "operation queued"
        );
        let (pending, completion) = Pending::new(operation);

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(pending).is_err() {
            // The processing thread is gone.
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(completion)
    }

    /// Submit an operation and wait for its result.
    pub async fn submit(
        &self,
        kind: impl Into<String>,
        payload: Value,
        client_tag: Option<&str>,
    ) -> QueueResult<ResultEnvelope> {
        self.enqueue(kind, payload, client_tag)?.await
    }

    /// Submit from a plain thread, blocking until the result arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn submit_blocking(
        &self,
        kind: impl Into<String>,
        payload: Value,
        client_tag: Option<&str>,
    ) -> QueueResult<ResultEnvelope> {
        self.enqueue(kind, payload, client_tag)?.wait()
    }

    /// Submit an already-typed command.
    pub async fn submit_command(
        &self,
        command: &Command,
        client_tag: Option<&str>,
    ) -> QueueResult<ResultEnvelope> {
        self.submit(command.kind().as_str(), command.to_payload(), client_tag)
            .await
    }

    /// Copy of the current entries.
    pub fn snapshot_state(&self) -> HashMap<String, Value> {
        self.shared.store.snapshot_entries()
    }

    /// Copy of the process log, one record per processed operation.
    pub fn snapshot_log(&self) -> Vec<String> {
        self.shared.store.snapshot_log()
    }

    pub fn statistics(&self) -> QueueStatistics {
        QueueStatistics {
            queue_length: self.shared.pending.load(Ordering::SeqCst),
            total_processed: self.shared.processed.load(Ordering::SeqCst),
            is_running: self.shared.running.load(Ordering::SeqCst),
            state_size: self.shared.store.len(),
            loop_state: self.shared.state(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// True once shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.ingress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Register a hook for every log line the processing loop emits.
    pub fn on_log(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.observers.add_log(Arc::new(hook));
    }

    /// Register a hook for loop-level failures.
    pub fn on_error(&self, hook: impl Fn(&LoopError) + Send + Sync + 'static) {
        self.shared.observers.add_error(Arc::new(hook));
    }

    /// Register a hook for every completed operation.
    pub fn on_processed(
        &self,
        hook: impl Fn(&OperationEnvelope, &ResultEnvelope) + Send + Sync + 'static,
    ) {
        self.shared.observers.add_processed(Arc::new(hook));
    }

    /// Stop accepting submissions, let the loop drain its backlog, and wait
    /// up to `timeout` for it to exit.
    ///
    /// Safe to call more than once; later calls only wait again. If the
    /// queue was never started, buffered operations are abandoned.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        if self.close() {
            info!("update queue shutting down");
            self.shared.transition(LoopState::Stopping);
        }

        if let Some(rx) = lock(&self.receiver).take() {
            drop(rx);
            let abandoned = self.shared.pending.swap(0, Ordering::SeqCst);
            self.shared.transition(LoopState::Stopped);
            info!(abandoned, "update queue shut down before start");
            return ShutdownOutcome::Clean;
        }

        let mut state = self.shared.state.subscribe();
        let stopped = tokio::time::timeout(
            timeout,
            state.wait_for(|s| *s == LoopState::Stopped),
        )
        .await;

        match stopped {
            Ok(_) => {
                self.reap_thread();
                info!("update queue stopped");
                ShutdownOutcome::Clean
            }
            Err(_) => {
                warn!(?timeout, "processing loop did not stop in time");
                ShutdownOutcome::TimedOut
            }
        }
    }

    /// [`UpdateQueue::shutdown`] with the configured timeout.
    pub async fn stop(&self) -> ShutdownOutcome {
        self.shutdown(self.config.shutdown_timeout()).await
    }

    /// The receiver went down with the unspawned closure, so nothing will
    /// ever drain. Close and publish `Stopped` so shutdown does not wait.
    fn abort_start(&self, err: std::io::Error) -> QueueError {
        error!(%err, "failed to spawn processing thread");
        self.close();
        self.shared.pending.store(0, Ordering::SeqCst);
        self.shared.transition(LoopState::Stopped);
        QueueError::Spawn(err)
    }

    /// Drop the ingress sender. Returns true if this call closed it.
    fn close(&self) -> bool {
        self.ingress
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    fn reap_thread(&self) {
        let mut thread = lock(&self.thread);
        if thread.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = thread.take() {
                if handle.join().is_err() {
                    error!("processing thread panicked");
                }
            }
        }
    }
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl Drop for UpdateQueue {
    // The thread keeps running until it has drained what was accepted.
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_state::CommandOutput;
    use serde_json::json;

    fn quick_config() -> QueueConfig {
        QueueConfig {
            slow_delay_ms: 20,
            ..QueueConfig::default()
        }
    }

    #[tokio::test]
    async fn set_then_get_are_adjacent() {
        let queue = UpdateQueue::new(quick_config());
        queue.start().unwrap();

        let set = queue
            .submit("SET", json!({ "key": "a", "value": 1 }), Some("c1"))
            .await
            .unwrap();
        let get = queue
            .submit("GET", json!({ "key": "a" }), Some("c1"))
            .await
            .unwrap();

        assert!(set.is_success());
        assert_eq!(get.value(), Some(&CommandOutput::Found(json!(1))));
        assert_eq!(get.sequence, set.sequence + 1);
        assert!(queue.shutdown(Duration::from_secs(1)).await.is_clean());
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let queue = UpdateQueue::new(quick_config());
        queue.start().unwrap();
        queue.start().unwrap();

        let result = queue.submit("SLOW", Value::Null, None).await.unwrap();
        assert_eq!(result.sequence, 1);
        assert!(queue.stop().await.is_clean());
    }

    #[tokio::test]
    async fn submissions_before_start_are_buffered() {
        let queue = UpdateQueue::new(quick_config());
        let first = queue
            .enqueue("INCREMENT", json!({ "key": "n" }), Some("early"))
            .unwrap();
        let second = queue
            .enqueue("INCREMENT", json!({ "key": "n" }), Some("early"))
            .unwrap();
        assert_eq!(queue.statistics().queue_length, 2);
        assert!(!queue.statistics().is_running);

        let first_id = first.operation_id();

        queue.start().unwrap();
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(first.operation_id, first_id);
        assert_ne!(second.operation_id, first_id);

        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(second.value(), Some(&CommandOutput::Counter(2)));
        queue.stop().await;
    }

    #[tokio::test]
    async fn shutdown_before_start_abandons_buffered_work() {
        let queue = UpdateQueue::new(quick_config());
        let pending = queue.enqueue("GET", json!({ "key": "a" }), None).unwrap();

        assert_eq!(
            queue.shutdown(Duration::from_millis(100)).await,
            ShutdownOutcome::Clean
        );
        assert!(matches!(pending.await, Err(QueueError::Abandoned(_))));
        assert_eq!(queue.state(), LoopState::Stopped);
        assert_eq!(queue.statistics().queue_length, 0);

        // Starting afterwards does nothing.
        queue.start().unwrap();
        assert!(!queue.statistics().is_running);
    }

    #[tokio::test]
    async fn failed_spawn_leaves_queue_stopped() {
        let queue = UpdateQueue::new(quick_config());
        let pending = queue.enqueue("GET", json!({ "key": "a" }), None).unwrap();

        drop(lock(&queue.receiver).take());
        let err = queue.abort_start(std::io::Error::other("no threads left"));
        assert!(matches!(err, QueueError::Spawn(_)));
        assert!(matches!(pending.await, Err(QueueError::Abandoned(_))));

        assert!(queue.is_closed());
        assert_eq!(queue.state(), LoopState::Stopped);
        assert_eq!(queue.statistics().queue_length, 0);

        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            queue.shutdown(Duration::from_secs(30)),
        )
        .await;
        assert_eq!(outcome.ok(), Some(ShutdownOutcome::Clean));
    }

    #[tokio::test]
    async fn shutdown_times_out_behind_slow_work() {
        let queue = UpdateQueue::new(QueueConfig {
            slow_delay_ms: 300,
            ..QueueConfig::default()
        });
        queue.start().unwrap();
        let slow = queue.enqueue("SLOW", Value::Null, None).unwrap();

        let outcome = queue.shutdown(Duration::from_millis(20)).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);

        // The in-flight operation still completes, and a later call sees the exit.
        assert!(slow.await.unwrap().is_success());
        assert!(queue.shutdown(Duration::from_secs(2)).await.is_clean());
    }

    #[tokio::test]
    async fn closed_queue_rejects_submissions() {
        let queue = UpdateQueue::new(quick_config());
        queue.start().unwrap();
        queue.stop().await;

        assert!(queue.is_closed());
        let err = queue
            .submit("SET", json!({ "key": "late", "value": 1 }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Closed));
        assert!(!queue.snapshot_state().contains_key("late"));
    }

    #[tokio::test]
    async fn submit_command_uses_typed_payload() {
        let queue = UpdateQueue::new(quick_config());
        queue.start().unwrap();

        let command = Command::Increment {
            key: "hits".to_string(),
            delta: 5,
        };
        let result = queue.submit_command(&command, Some("typed")).await.unwrap();
        assert_eq!(result.value(), Some(&CommandOutput::Counter(5)));
        queue.stop().await;
    }
}

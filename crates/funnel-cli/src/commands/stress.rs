use std::sync::Arc;
use std::time::Instant;

use funnel_queue::{QueueConfig, UpdateQueue, Value};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

/// Outcome of a stress run.
#[derive(Debug, Serialize)]
pub struct StressReport {
    pub key: String,
    pub expected: u64,
    pub actual: Option<Value>,
    /// Submissions that were rejected or failed.
    pub failures: usize,
    pub elapsed_ms: u64,
}

impl StressReport {
    /// An untouched key counts as zero.
    pub fn lost_updates(&self) -> bool {
        let actual = self.actual.clone().unwrap_or_else(|| json!(0));
        actual != json!(self.expected)
    }
}

pub async fn stress(config: QueueConfig, clients: usize, ops: usize, key: &str) -> anyhow::Result<()> {
    let queue = Arc::new(UpdateQueue::new(config));
    queue.start()?;

    let report = drive(queue.clone(), clients, ops, key).await?;
    let outcome = queue.stop().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "report": report,
            "statistics": queue.statistics(),
            "shutdown": outcome,
        }))?
    );

    anyhow::ensure!(
        !report.lost_updates(),
        "lost updates on '{}': expected {}, found {:?}",
        report.key,
        report.expected,
        report.actual
    );
    Ok(())
}

/// Run `clients` concurrent tasks, each submitting `ops` increments of `key`.
pub async fn drive(
    queue: Arc<UpdateQueue>,
    clients: usize,
    ops: usize,
    key: &str,
) -> anyhow::Result<StressReport> {
    info!(clients, ops, key, "stress run starting");
    let started = Instant::now();

    let mut handles = Vec::with_capacity(clients);
    for client in 0..clients {
        let queue = queue.clone();
        let key = key.to_string();
        handles.push(tokio::spawn(async move {
            let tag = format!("client-{client}");
            let mut failures = 0usize;
            for _ in 0..ops {
                match queue
                    .submit("INCREMENT", json!({ "key": key }), Some(tag.as_str()))
                    .await
                {
                    Ok(result) if result.is_success() => {}
                    Ok(result) => {
                        warn!(client = %tag, seq = result.sequence, "increment failed");
                        failures += 1;
                    }
                    Err(err) => {
                        warn!(client = %tag, %err, "increment rejected");
                        failures += 1;
                    }
                }
            }
            failures
        }));
    }

    let mut failures = 0;
    for handle in handles {
        failures += handle.await?;
    }

    let report = StressReport {
        key: key.to_string(),
        expected: (clients * ops) as u64,
        actual: queue.snapshot_state().get(key).cloned(),
        failures,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(elapsed_ms = report.elapsed_ms, failures, "stress run finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ten_clients_reach_one_hundred() {
        let queue = Arc::new(UpdateQueue::default());
        queue.start().unwrap();

        let report = drive(queue.clone(), 10, 10, "c").await.unwrap();
        assert_eq!(report.expected, 100);
        assert_eq!(report.actual, Some(json!(100)));
        assert_eq!(report.failures, 0);
        assert!(!report.lost_updates());
        assert!(queue.stop().await.is_clean());
    }

    #[tokio::test]
    async fn zero_clients_is_not_a_loss() {
        let queue = Arc::new(UpdateQueue::default());
        queue.start().unwrap();

        let report = drive(queue.clone(), 0, 10, "c").await.unwrap();
        assert_eq!(report.expected, 0);
        assert_eq!(report.actual, None);
        assert!(!report.lost_updates());
        queue.stop().await;
    }

    #[tokio::test]
    async fn closed_queue_counts_failures() {
        let queue = Arc::new(UpdateQueue::default());
        queue.start().unwrap();
        queue.stop().await;

        let report = drive(queue, 2, 3, "c").await.unwrap();
        assert_eq!(report.failures, 6);
        assert!(report.lost_updates());
    }
}

//! Ordering and single-writer guarantees of the update queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use funnel_queue::{CommandOutput, QueueConfig, UpdateQueue};
use serde_json::json;

fn started_queue(slow_delay_ms: u64) -> Arc<UpdateQueue> {
    let queue = UpdateQueue::new(QueueConfig {
        slow_delay_ms,
        ..QueueConfig::default()
    });
    queue.start().unwrap();
    Arc::new(queue)
}

#[tokio::test]
async fn sequential_submissions_get_contiguous_sequences() {
    let queue = started_queue(10);

    let mut sequences = Vec::new();
    for i in 1..=20 {
        let result = queue
            .submit(
                "SET",
                json!({ "key": format!("key{i}"), "value": format!("value{i}") }),
                Some("sequential"),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        sequences.push(result.sequence);
    }

    let expected: Vec<u64> = (1..=20).collect();
    assert_eq!(sequences, expected);
    assert_eq!(queue.snapshot_state().len(), 20);
    queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_lose_no_updates() {
    let queue = started_queue(10);

    let mut handles = Vec::new();
    for client in 0..10 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let tag = format!("client-{client}");
            let mut sequences = Vec::new();
            for _ in 0..10 {
                let result = queue
                    .submit("INCREMENT", json!({ "key": "c" }), Some(tag.as_str()))
                    .await
                    .unwrap();
                assert!(result.is_success());
                sequences.push(result.sequence);
            }
            sequences
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for sequence in handle.await.unwrap() {
            assert!(seen.insert(sequence), "sequence {sequence} delivered twice");
        }
    }

    assert_eq!(seen, (1..=100).collect::<HashSet<u64>>());
    assert_eq!(queue.snapshot_state().get("c"), Some(&json!(100)));
    assert_eq!(queue.statistics().total_processed, 100);
    queue.stop().await;
}

#[test]
fn blocking_submitters_on_plain_threads() {
    let queue = UpdateQueue::default();
    queue.start().unwrap();

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let queue = &queue;
            scope.spawn(move || {
                let tag = format!("thread-{worker}");
                for _ in 0..25 {
                    let result = queue
                        .submit_blocking(
                            "increment",
                            json!({ "key": "total", "value": 2 }),
                            Some(tag.as_str()),
                        )
                        .unwrap();
                    assert!(result.is_success());
                }
            });
        }
    });

    assert_eq!(queue.snapshot_state().get("total"), Some(&json!(400)));
    assert_eq!(queue.snapshot_log().len(), 200);
}

#[tokio::test]
async fn single_caller_order_is_preserved_without_waiting() {
    let queue = started_queue(10);

    let completions: Vec<_> = (0..50)
        .map(|i| {
            queue
                .enqueue("SET", json!({ "key": "last", "value": i }), Some("burst"))
                .unwrap()
        })
        .collect();

    let mut previous = 0;
    for completion in completions {
        let sequence = completion.await.unwrap().sequence;
        assert_eq!(sequence, previous + 1);
        previous = sequence;
    }
    assert_eq!(queue.snapshot_state().get("last"), Some(&json!(49)));
    queue.stop().await;
}

#[tokio::test]
async fn batch_steps_run_in_list_order() {
    let queue = started_queue(10);

    let result = queue
        .submit(
            "BATCH",
            json!({
                "operations": [
                    { "type": "SET", "key": "x", "value": "first" },
                    { "type": "SET", "key": "y", "value": "second" },
                    { "type": "GET", "key": "x" },
                    { "type": "ERROR" },
                ]
            }),
            Some("batcher"),
        )
        .await
        .unwrap();

    let Some(CommandOutput::Batch(outputs)) = result.value() else {
        panic!("expected batch output, got {result:?}");
    };
    assert_eq!(outputs[2], CommandOutput::Found(json!("first")));
    assert_eq!(
        outputs[3],
        CommandOutput::Skipped {
            kind: "ERROR".to_string()
        }
    );

    let state = queue.snapshot_state();
    assert_eq!(state.get("y"), Some(&json!("second")));
    queue.stop().await;
}

#[tokio::test]
async fn batch_with_odd_entries_still_applies_valid_steps() {
    let queue = started_queue(10);

    let result = queue
        .submit(
            "BATCH",
            json!({
                "operations": [
                    { "type": 5 },
                    "junk",
                    { "type": "SET", "key": "a", "value": 1 },
                    { "type": "INCREMENT", "key": "a", "value": 2 },
                ]
            }),
            Some("batcher"),
        )
        .await
        .unwrap();

    assert!(result.is_success(), "{result:?}");
    let Some(CommandOutput::Batch(outputs)) = result.value() else {
        panic!("expected batch output, got {result:?}");
    };
    assert_eq!(outputs.len(), 3);
    assert_eq!(outputs[0].to_string(), "Unknown operation: 5");
    assert_eq!(outputs[2].as_value(), Some(json!(3)));
    assert_eq!(queue.snapshot_state().get("a"), Some(&json!(3)));
    queue.stop().await;
}

#[tokio::test]
async fn slow_operation_blocks_the_head_of_the_line() {
    let queue = started_queue(80);

    let accepted = Instant::now();
    let slow = queue.enqueue("SLOW", json!(null), Some("slow")).unwrap();
    let fast = queue
        .enqueue("GET", json!({ "key": "anything" }), Some("fast"))
        .unwrap();

    let fast = fast.await.unwrap();
    assert!(accepted.elapsed() >= Duration::from_millis(80));

    let slow = slow.await.unwrap();
    assert_eq!(fast.sequence, slow.sequence + 1);
    assert_eq!(fast.value(), Some(&CommandOutput::Missing));
    assert_eq!(
        slow.value(),
        Some(&CommandOutput::Message("Slow operation completed".to_string()))
    );
    queue.stop().await;
}

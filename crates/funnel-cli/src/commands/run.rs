use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use funnel_queue::{QueueConfig, QueueError, ResultEnvelope, UpdateQueue, Value};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

/// One line of an operation script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptLine {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "default_client")]
    pub client: String,
}

fn default_client() -> String {
    "script".to_string()
}

pub async fn run(
    config: QueueConfig,
    script: &Path,
    show_state: bool,
    show_log: bool,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    let lines = parse_script(&content)?;
    info!(operations = lines.len(), script = %script.display(), "replaying script");

    let queue = Arc::new(UpdateQueue::new(config));
    queue.on_error(|err| error!(%err, "processing loop error"));
    queue.start()?;

    let mut handles = Vec::new();
    for (client, lines) in group_by_client(lines) {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut results = Vec::with_capacity(lines.len());
            for line in lines {
                let result = queue
                    .submit(line.kind.clone(), line.payload.clone(), Some(client.as_str()))
                    .await;
                results.push((line, result));
            }
            results
        }));
    }

    let mut results: Vec<(ScriptLine, Result<ResultEnvelope, QueueError>)> = Vec::new();
    for handle in handles {
        results.extend(handle.await?);
    }
    results.sort_by_key(|(_, result)| result.as_ref().map_or(u64::MAX, |r| r.sequence));

    for (line, result) in &results {
        let record = match result {
            Ok(envelope) => json!({ "client": line.client, "kind": line.kind, "result": envelope }),
            Err(err) => json!({ "client": line.client, "kind": line.kind, "rejected": err.to_string() }),
        };
        println!("{}", serde_json::to_string(&record)?);
    }

    let outcome = queue.stop().await;
    println!(
        "{}",
        serde_json::to_string(&json!({ "statistics": queue.statistics(), "shutdown": outcome }))?
    );
    if show_state {
        println!("{}", serde_json::to_string_pretty(&queue.snapshot_state())?);
    }
    if show_log {
        for line in queue.snapshot_log() {
            println!("{line}");
        }
    }

    Ok(())
}

/// Parse JSON-lines, skipping blanks and `#` comments.
pub fn parse_script(content: &str) -> anyhow::Result<Vec<ScriptLine>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: invalid operation", n + 1))
        })
        .collect()
}

/// Split lines per client, keeping first-appearance order of clients and
/// file order within each client.
fn group_by_client(lines: Vec<ScriptLine>) -> Vec<(String, Vec<ScriptLine>)> {
    let mut groups: Vec<(String, Vec<ScriptLine>)> = Vec::new();
    for line in lines {
        match groups.iter_mut().find(|(client, _)| *client == line.client) {
            Some((_, group)) => group.push(line),
            None => groups.push((line.client.clone(), vec![line])),
        }
    }
    groups
}

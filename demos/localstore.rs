//! Simulated chord: a batch is split into chunks, each chunk runs as its own
//! task, and a group sums the per-chunk counts once every chunk is done.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use taskledger::prelude::*;

const CHUNKS: usize = 4;
const USERS_PER_CHUNK: i64 = 25;

/// Stand-in for a worker executing one chunk.
async fn run_chunk(ledger: Arc<TaskLedger>, task_id: String, chunk: usize) -> LedgerResult<()> {
    ledger.on_start(&task_id).await?;

    // The second chunk hits a transient error on its first attempt
    if chunk == 1 {
        ledger.on_retry(&task_id, "database is locked").await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        ledger.on_start(&task_id).await?;
    }

    for done in (0..=USERS_PER_CHUNK).step_by(5) {
        ledger.on_progress(&task_id, done, USERS_PER_CHUNK).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let created = json!(USERS_PER_CHUNK);
    ledger.on_success(&task_id, created.clone()).await?;
    ledger
        .on_child_terminal("create-users", &task_id, ChildOutcome::Success(created))
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> LedgerResult<()> {
    let config = LedgerConfig::development();
    taskledger::logging::init(&config.logging)?;

    let ledger = Arc::new(TaskLedger::new(config).await?);

    let children: Vec<TaskId> = (0..CHUNKS).map(|_| generate_id()).collect();
    for (chunk, task_id) in children.iter().enumerate() {
        ledger
            .on_submit(
                task_id,
                "demo.tasks.create_users_chunk",
                json!([chunk, USERS_PER_CHUNK]),
                json!({ "prefix": format!("user_{chunk}") }),
            )
            .await?;
    }
    ledger
        .on_group_submit("create-users", children.clone(), "sum")
        .await?;

    println!("📦 Dispatched {CHUNKS} chunks");

    let workers = children.iter().enumerate().map(|(chunk, task_id)| {
        tokio::spawn(run_chunk(Arc::clone(&ledger), task_id.clone(), chunk))
    });
    for joined in futures::future::join_all(workers).await {
        if let Err(e) = joined.map_err(|e| LedgerError::store("worker panicked", e))? {
            eprintln!("❌ Chunk failed: {e}");
        }
    }

    for child in ledger.group_children("create-users").await? {
        println!(
            "  {} {} in {:?} (retries: {})",
            child.task_id, child.status, child.duration, child.retry_count
        );
    }

    let report = ledger.get_group_status("create-users").await?;
    println!(
        "✅ Group {} finished as {}: {} users created",
        report.group_id,
        report.status,
        report.aggregated_result.unwrap_or(Value::Null)
    );

    let overview = ledger.overview(3).await?;
    println!("📊 {:?}", overview.stats);
    Ok(())
}

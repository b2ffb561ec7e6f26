//! Track a task in Redis so its record outlives the process.
//!
//! Run with a local server: `cargo run --example redis --features redis-store`.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskledger::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = LedgerConfig::development();
    config.store = StoreConfig::redis("redis://localhost:6379");
    taskledger::logging::init(&config.logging)?;

    println!("🔗 Connecting to Redis");
    let ledger = Arc::new(TaskLedger::new(config).await?);
    ledger.health_check().await?;

    let task_id = generate_id();
    ledger
        .on_submit(
            &task_id,
            "demo.tasks.generate_report",
            json!(["monthly"]),
            json!({ "format": "pdf" }),
        )
        .await?;
    ledger.on_start(&task_id).await?;

    for page in 1..=4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ledger.on_progress(&task_id, page, 4).await?;
        let progress = ledger.get_progress(&task_id).await?;
        println!("📄 {}/{} ({:?}%)", progress.current, progress.total, progress.percent);
    }

    ledger
        .on_success(&task_id, json!({ "path": "reports/monthly.pdf" }))
        .await?;

    let status = ledger.get_status(&task_id).await?;
    println!(
        "✅ {} {} in {:?}: {}",
        status.task_id,
        status.status,
        status.duration,
        status.result.unwrap_or_default()
    );

    let mut sweeper = RetentionSweeper::with_config(
        Arc::clone(&ledger),
        RetentionConfig::every(3600).keep_for(24 * 3600),
    );
    let purged = sweeper.sweep_once().await?;
    println!("🧹 Purged {} old tasks", purged.tasks_removed);

    sweeper.start()?;
    tokio::signal::ctrl_c().await?;
    sweeper.shutdown().await?;
    Ok(())
}

//! Redis record store.
//!
//! Records are kept as JSON strings in two hashes, `{prefix}:tasks` and
//! `{prefix}:groups`, so they survive process restarts and can be shared by
//! every worker talking to the same Redis.
//!
//! Inserts use `HSETNX`; versioned replaces and purges run as Lua scripts so
//! the version check and the write happen atomically on the server.

use super::{PurgeStats, RecordStore, StoreStats, group_expired, task_expired};
use crate::config::{DurationExt, RedisConfig};
use crate::error::{LedgerError, LedgerResult};
use crate::group::AggregateRecord;
use crate::task::{TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, RedisError, Script};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::timeout;
use tracing::{debug, info};

/// Redis store backend implementation
pub struct RedisStore {
    /// Redis connection manager
    conn: ConnectionManager,
    /// Redis configuration
    config: RedisConfig,
    /// Pre-compiled Lua scripts for atomic operations
    scripts: RedisScripts,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("scripts", &self.scripts)
            .finish_non_exhaustive()
    }
}

/// Pre-compiled Lua scripts for atomic Redis operations
#[derive(Debug)]
struct RedisScripts {
    /// Compare-and-set on a record's version
    replace_script: Script,
    /// Delete records whose version is unchanged
    purge_script: Script,
}

impl RedisScripts {
    fn new() -> Self {
        Self {
            replace_script: Script::new(include_str!("scripts/replace_versioned.lua")),
            purge_script: Script::new(include_str!("scripts/purge_finished.lua")),
        }
    }
}

fn redis_error(context: &'static str) -> impl FnOnce(RedisError) -> LedgerError {
    move |e| LedgerError::store(format!("{context}: {e}"), e)
}

impl RedisStore {
    /// Connect to Redis using the given configuration
    pub async fn new(config: RedisConfig) -> LedgerResult<Self> {
        let client = Client::open(config.connection_string.as_str())?;

        let conn = timeout(
            config.connect_timeout_secs.secs(),
            client.get_connection_manager(),
        )
        .await
        .map_err(|e| LedgerError::store("Timed out connecting to Redis", e))?
        .map_err(redis_error("Failed to create Redis connection manager"))?;

        info!(prefix = %config.key_prefix, "Connected Redis record store");

        Ok(Self {
            conn,
            config,
            scripts: RedisScripts::new(),
        })
    }

    /// Get Redis key for the task records hash
    fn tasks_key(&self) -> String {
        format!("{}:tasks", self.config.key_prefix)
    }

    /// Get Redis key for the aggregate records hash
    fn groups_key(&self) -> String {
        format!("{}:groups", self.config.key_prefix)
    }

    async fn insert_new<T: Serialize>(&self, key: &str, id: &str, record: &T) -> LedgerResult<bool> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        conn.hset_nx(key, id, json)
            .await
            .map_err(redis_error("Failed to insert record"))
    }

    async fn get_one<T: DeserializeOwned>(&self, key: &str, id: &str) -> LedgerResult<Option<T>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .hget(key, id)
            .await
            .map_err(redis_error("Failed to read record"))?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_all<T: DeserializeOwned>(&self, key: &str) -> LedgerResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .hvals(key)
            .await
            .map_err(redis_error("Failed to scan records"))?;

        values
            .iter()
            .map(|json| serde_json::from_str(json).map_err(LedgerError::from))
            .collect()
    }

    /// Returns `None` when the record does not exist
    async fn replace_versioned<T: Serialize>(
        &self,
        key: &str,
        id: &str,
        record: &T,
        expected_version: u64,
    ) -> LedgerResult<Option<bool>> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;

        let outcome: i32 = self
            .scripts
            .replace_script
            .key(key)
            .arg(id)
            .arg(expected_version)
            .arg(json)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error("Failed to replace record"))?;

        Ok(match outcome {
            -1 => None,
            0 => Some(false),
            _ => Some(true),
        })
    }

    async fn purge_ids(&self, key: &str, selected: Vec<(String, u64)>) -> LedgerResult<u64> {
        if selected.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.purge_script.key(key);
        for (id, version) in &selected {
            invocation.arg(id).arg(*version);
        }

        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error("Failed to purge records"))
    }

    fn newest_first(records: &mut [TaskRecord]) {
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn insert_task(&self, record: TaskRecord) -> LedgerResult<()> {
        if !self
            .insert_new(&self.tasks_key(), &record.task_id, &record)
            .await?
        {
            return Err(LedgerError::DuplicateTask {
                task_id: record.task_id,
            });
        }
        debug!(task_id = %record.task_id, "Stored task record");
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> LedgerResult<Option<TaskRecord>> {
        self.get_one(&self.tasks_key(), task_id).await
    }

    async fn replace_task(&self, record: TaskRecord, expected_version: u64) -> LedgerResult<bool> {
        self.replace_versioned(&self.tasks_key(), &record.task_id, &record, expected_version)
            .await?
            .ok_or_else(|| LedgerError::unknown_task(&record.task_id))
    }

    async fn insert_group(&self, record: AggregateRecord) -> LedgerResult<()> {
        if !self
            .insert_new(&self.groups_key(), &record.group_id, &record)
            .await?
        {
            return Err(LedgerError::DuplicateGroup {
                group_id: record.group_id,
            });
        }
        debug!(group_id = %record.group_id, "Stored aggregate record");
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> LedgerResult<Option<AggregateRecord>> {
        self.get_one(&self.groups_key(), group_id).await
    }

    async fn replace_group(
        &self,
        record: AggregateRecord,
        expected_version: u64,
    ) -> LedgerResult<bool> {
        self.replace_versioned(
            &self.groups_key(),
            &record.group_id,
            &record,
            expected_version,
        )
        .await?
        .ok_or_else(|| LedgerError::unknown_group(&record.group_id))
    }

    async fn tasks_by_status(
        &self,
        status: TaskStatus,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self.get_all(&self.tasks_key()).await?;
        tasks.retain(|task| task.status == status);
        Self::newest_first(&mut tasks);
        if let Some(limit) = limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn recent_tasks(&self, limit: usize) -> LedgerResult<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self.get_all(&self.tasks_key()).await?;
        Self::newest_first(&mut tasks);
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn stats(&self) -> LedgerResult<StoreStats> {
        let tasks: Vec<TaskRecord> = self.get_all(&self.tasks_key()).await?;
        let groups: Vec<AggregateRecord> = self.get_all(&self.groups_key()).await?;
        Ok(StoreStats::tally(&tasks, &groups))
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<PurgeStats> {
        let tasks: Vec<TaskRecord> = self.get_all(&self.tasks_key()).await?;
        let expired_tasks = tasks
            .into_iter()
            .filter(|task| task_expired(task, cutoff))
            .map(|task| (task.task_id, task.version))
            .collect();
        let tasks_removed = self.purge_ids(&self.tasks_key(), expired_tasks).await?;

        let groups: Vec<AggregateRecord> = self.get_all(&self.groups_key()).await?;
        let expired_groups = groups
            .into_iter()
            .filter(|group| group_expired(group, cutoff))
            .map(|group| (group.group_id, group.version))
            .collect();
        let groups_removed = self.purge_ids(&self.groups_key(), expired_groups).await?;

        if tasks_removed + groups_removed > 0 {
            info!(tasks_removed, groups_removed, "Purged expired records from Redis");
        }

        Ok(PurgeStats {
            tasks_removed,
            groups_removed,
        })
    }

    async fn health_check(&self) -> LedgerResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Redis health check failed"))?;

        if pong != "PONG" {
            return Err(LedgerError::Store {
                message: format!("Unexpected PING reply: {pong}"),
                source: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! These tests need a Redis server on `REDIS_URL` (default localhost) and
    //! are ignored by default: `cargo test --features redis-store -- --ignored`.

    use super::*;
    use crate::task::generate_id;
    use serde_json::json;

    async fn connect() -> RedisStore {
        let connection_string = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
        RedisStore::new(RedisConfig {
            connection_string,
            key_prefix: format!("taskledger-test-{}", generate_id()),
            connect_timeout_secs: 2,
        })
        .await
        .expect("redis should be reachable")
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_insert_and_replace() {
        let store = connect().await;
        store.health_check().await.unwrap();

        let record = TaskRecord::new("t1", "app.tasks.add", json!([1, 2]), json!({}), Utc::now());
        store.insert_task(record.clone()).await.unwrap();
        assert!(matches!(
            store.insert_task(record.clone()).await,
            Err(LedgerError::DuplicateTask { .. })
        ));

        let mut next = record.clone();
        next.status = TaskStatus::Started;
        next.version = 1;
        assert!(store.replace_task(next.clone(), 0).await.unwrap());
        assert!(!store.replace_task(record, 0).await.unwrap());
        assert_eq!(store.get_task("t1").await.unwrap(), Some(next));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_purge_and_stats() {
        let store = connect().await;
        let old = Utc::now() - chrono::TimeDelta::days(30);

        let mut done = TaskRecord::new("done", "app.tasks.add", json!([]), json!({}), old);
        done.status = TaskStatus::Success;
        done.finished_at = Some(old);
        store.insert_task(done).await.unwrap();
        store
            .insert_task(TaskRecord::new("live", "app.tasks.add", json!([]), json!({}), old))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_tasks(), 2);

        let purged = store.purge_finished_before(Utc::now()).await.unwrap();
        assert_eq!(purged.tasks_removed, 1);
        assert!(store.get_task("live").await.unwrap().is_some());
    }
}

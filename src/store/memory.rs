//! In-memory record store.
//!
//! Records live in `HashMap`s behind async-friendly locks. Nothing survives a
//! restart, so this backend suits tests, demos and single-process services.

use super::{PurgeStats, RecordStore, StoreStats, group_expired, task_expired};
use crate::error::{LedgerError, LedgerResult};
use crate::group::{AggregateRecord, GroupId};
use crate::task::{TaskId, TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory store backend implementation
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Task records indexed by task id
    tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
    /// Aggregate records indexed by group id
    groups: Arc<RwLock<HashMap<GroupId, AggregateRecord>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
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
impl RecordStore for InMemoryStore {
    async fn insert_task(&self, record: TaskRecord) -> LedgerResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.entry(record.task_id.clone()) {
            Entry::Occupied(entry) => Err(LedgerError::DuplicateTask {
                task_id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn get_task(&self, task_id: &str) -> LedgerResult<Option<TaskRecord>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(task_id).cloned())
    }

    async fn replace_task(&self, record: TaskRecord, expected_version: u64) -> LedgerResult<bool> {
        let mut tasks = self.tasks.write().await;
        let current = tasks
            .get_mut(&record.task_id)
            .ok_or_else(|| LedgerError::unknown_task(&record.task_id))?;

        if current.version != expected_version {
            return Ok(false);
        }
        *current = record;
        Ok(true)
    }

    async fn insert_group(&self, record: AggregateRecord) -> LedgerResult<()> {
        let mut groups = self.groups.write().await;
        match groups.entry(record.group_id.clone()) {
            Entry::Occupied(entry) => Err(LedgerError::DuplicateGroup {
                group_id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn get_group(&self, group_id: &str) -> LedgerResult<Option<AggregateRecord>> {
        let groups = self.groups.read().await;
        Ok(groups.get(group_id).cloned())
    }

    async fn replace_group(
        &self,
        record: AggregateRecord,
        expected_version: u64,
    ) -> LedgerResult<bool> {
        let mut groups = self.groups.write().await;
        let current = groups
            .get_mut(&record.group_id)
            .ok_or_else(|| LedgerError::unknown_group(&record.group_id))?;

        if current.version != expected_version {
            return Ok(false);
        }
        *current = record;
        Ok(true)
    }

    async fn tasks_by_status(
        &self,
        status: TaskStatus,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<TaskRecord>> {
        let tasks = self.tasks.read().await;
        let mut result: Vec<TaskRecord> = tasks
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect();

        Self::newest_first(&mut result);
        if let Some(limit) = limit {
            result.truncate(limit);
        }

        Ok(result)
    }

    async fn recent_tasks(&self, limit: usize) -> LedgerResult<Vec<TaskRecord>> {
        let tasks = self.tasks.read().await;
        let mut result: Vec<TaskRecord> = tasks.values().cloned().collect();
        Self::newest_first(&mut result);
        result.truncate(limit);
        Ok(result)
    }

    async fn stats(&self) -> LedgerResult<StoreStats> {
        let tasks = self.tasks.read().await;
        let groups = self.groups.read().await;
        Ok(StoreStats::tally(tasks.values(), groups.values()))
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<PurgeStats> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| !task_expired(record, cutoff));
        let tasks_removed = (before - tasks.len()) as u64;
        drop(tasks);

        let mut groups = self.groups.write().await;
        let before = groups.len();
        groups.retain(|_, record| !group_expired(record, cutoff));
        let groups_removed = (before - groups.len()) as u64;

        Ok(PurgeStats {
            tasks_removed,
            groups_removed,
        })
    }

    async fn health_check(&self) -> LedgerResult<()> {
        let tasks = self.tasks.read().await.len();
        let groups = self.groups.read().await.len();

        tracing::debug!(tasks, groups, "In-memory store health check");
        Ok(())
    }
}

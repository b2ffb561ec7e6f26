//! Storage backends for task and aggregate records.
//!
//! The ledger never mutates records in place. Every change goes through a
//! versioned compare-and-set (`replace_*` with the version the caller read),
//! which serializes concurrent transitions on the same record even when the
//! writers live in different processes.
//!
//! - **In-Memory**: for tests, demos and single-process deployments
//! - **Redis**: durable and shared between processes (feature `redis-store`)
//!
//! # Examples
//!
//! ```rust,no_run
//! use taskledger::prelude::*;
//!
//! # async fn example() -> LedgerResult<()> {
//! // In-memory store (default)
//! let store = InMemoryStore::new();
//!
//! // Any store from configuration
//! let store = StoreFactory::from_config(&StoreConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{StoreBackendConfig, StoreConfig};
use crate::error::LedgerResult;
use crate::group::{AggregateRecord, AggregateStatus};
use crate::task::{TaskRecord, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod memory;
pub use memory::InMemoryStore;

#[cfg(feature = "redis-store")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
pub mod redis;

#[cfg(feature = "redis-store")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
pub use self::redis::RedisStore;

/// Record counts held by a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Tasks in PENDING
    pub pending: u64,
    /// Tasks in STARTED
    pub started: u64,
    /// Tasks in SUCCESS
    pub success: u64,
    /// Tasks in FAILURE
    pub failure: u64,
    /// Tasks in RETRY
    pub retry: u64,
    /// Tasks in REVOKED
    pub revoked: u64,
    /// Aggregates still waiting on children
    pub groups_pending: u64,
    /// Aggregates that have been finalized
    pub groups_finalized: u64,
}

impl StoreStats {
    /// Build stats by walking every record
    pub fn tally<'a>(
        tasks: impl IntoIterator<Item = &'a TaskRecord>,
        groups: impl IntoIterator<Item = &'a AggregateRecord>,
    ) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            *stats.count_mut(task.status) += 1;
        }
        for group in groups {
            if group.status == AggregateStatus::Pending {
                stats.groups_pending += 1;
            } else {
                stats.groups_finalized += 1;
            }
        }
        stats
    }

    /// Number of tasks in `status`
    pub fn count(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Started => self.started,
            TaskStatus::Success => self.success,
            TaskStatus::Failure => self.failure,
            TaskStatus::Retry => self.retry,
            TaskStatus::Revoked => self.revoked,
        }
    }

    fn count_mut(&mut self, status: TaskStatus) -> &mut u64 {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Started => &mut self.started,
            TaskStatus::Success => &mut self.success,
            TaskStatus::Failure => &mut self.failure,
            TaskStatus::Retry => &mut self.retry,
            TaskStatus::Revoked => &mut self.revoked,
        }
    }

    /// Total number of task records
    pub fn total_tasks(&self) -> u64 {
        TaskStatus::ALL.iter().map(|status| self.count(*status)).sum()
    }
}

/// What a retention purge removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeStats {
    /// Terminal task records removed
    pub tasks_removed: u64,
    /// Finalized aggregate records removed
    pub groups_removed: u64,
}

/// Check whether a task record is old enough to be purged
pub(crate) fn task_expired(record: &TaskRecord, cutoff: DateTime<Utc>) -> bool {
    record.status.is_terminal() && record.finished_at.is_some_and(|at| at < cutoff)
}

/// Check whether an aggregate record is old enough to be purged
pub(crate) fn group_expired(record: &AggregateRecord, cutoff: DateTime<Utc>) -> bool {
    record.status.is_terminal() && record.finalized_at.is_some_and(|at| at < cutoff)
}

/// Trait that all record stores must implement
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new task record.
    ///
    /// Fails with `DuplicateTask` if the id is already present.
    async fn insert_task(&self, record: TaskRecord) -> LedgerResult<()>;

    /// Get a task record by id
    async fn get_task(&self, task_id: &str) -> LedgerResult<Option<TaskRecord>>;

    /// Replace a task record if its stored version still equals
    /// `expected_version`.
    ///
    /// Returns `false` when another writer got there first. Fails with
    /// `UnknownTask` if the record no longer exists.
    async fn replace_task(&self, record: TaskRecord, expected_version: u64) -> LedgerResult<bool>;

    /// Insert a new aggregate record.
    ///
    /// Fails with `DuplicateGroup` if the id is already present.
    async fn insert_group(&self, record: AggregateRecord) -> LedgerResult<()>;

    /// Get an aggregate record by id
    async fn get_group(&self, group_id: &str) -> LedgerResult<Option<AggregateRecord>>;

    /// Versioned replace for aggregates, same contract as `replace_task`
    async fn replace_group(
        &self,
        record: AggregateRecord,
        expected_version: u64,
    ) -> LedgerResult<bool>;

    /// Get tasks by status, newest first, with optional limit
    async fn tasks_by_status(
        &self,
        status: TaskStatus,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<TaskRecord>>;

    /// Most recently submitted tasks, newest first
    async fn recent_tasks(&self, limit: usize) -> LedgerResult<Vec<TaskRecord>>;

    /// Record counts
    async fn stats(&self) -> LedgerResult<StoreStats>;

    /// Remove terminal tasks finished before `cutoff` and aggregates
    /// finalized before `cutoff`
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<PurgeStats>;

    /// Health check for the store
    async fn health_check(&self) -> LedgerResult<()>;
}

/// Shared handle to a store
pub type SharedStore = Arc<dyn RecordStore>;

/// Factory methods for creating stores
pub struct StoreFactory;

impl StoreFactory {
    /// Create an in-memory store
    pub fn in_memory() -> SharedStore {
        Arc::new(InMemoryStore::new())
    }

    /// Create a Redis store
    #[cfg(feature = "redis-store")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
    pub async fn redis(config: crate::config::RedisConfig) -> LedgerResult<SharedStore> {
        let store = RedisStore::new(config).await?;
        Ok(Arc::new(store))
    }

    /// Create whichever store the configuration selects
    pub async fn from_config(config: &StoreConfig) -> LedgerResult<SharedStore> {
        match &config.backend {
            StoreBackendConfig::InMemory => Ok(Self::in_memory()),
            #[cfg(feature = "redis-store")]
            StoreBackendConfig::Redis(redis) => Self::redis(redis.clone()).await,
        }
    }
}

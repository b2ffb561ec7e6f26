//! The task ledger: lifecycle tracking and fan-in aggregation.
//!
//! [`TaskLedger`] is the interface a dispatcher calls into. It owns a
//! [`RecordStore`](crate::store::RecordStore), a [`Clock`] and a
//! [`ReducerRegistry`], all passed in explicitly; there is no ambient state.
//!
//! Every mutation is read → pure transition → versioned compare-and-set.
//! When the compare-and-set loses to a concurrent writer the transition is
//! re-evaluated against the winner's record, so a redelivered callback that
//! lost the race still ends up as a no-op or a surfaced error.

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::group::{AggregateRecord, ChildOutcome, GroupReport};
use crate::store::{PurgeStats, SharedStore, StoreFactory, StoreStats};
use crate::task::{ErrorDetail, ProgressReport, StatusReport, TaskId, TaskRecord, TaskStatus};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod aggregate;
pub mod lifecycle;
pub mod reducer;
pub mod sweeper;

pub use lifecycle::Transition;
pub use reducer::{CollectReducer, FnReducer, Reducer, ReducerRegistry, SumReducer};
pub use sweeper::RetentionSweeper;

/// Status counts plus the latest submissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerOverview {
    /// Record counts per status
    pub stats: StoreStats,
    /// Most recent tasks, newest first
    pub recent: Vec<StatusReport>,
}

/// Records the lifecycle of externally dispatched tasks.
///
/// # Examples
///
/// ```rust
/// use taskledger::prelude::*;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> LedgerResult<()> {
///     let ledger = TaskLedger::new(LedgerConfig::default()).await?;
///
///     ledger.on_submit("t1", "app.tasks.add", json!([4, 4]), json!({})).await?;
///     ledger.on_start("t1").await?;
///     ledger.on_success("t1", json!(8)).await?;
///
///     let status = ledger.get_status("t1").await?;
///     assert_eq!(status.status, TaskStatus::Success);
///     assert_eq!(status.result, Some(json!(8)));
///     Ok(())
/// }
/// ```
pub struct TaskLedger {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    reducers: ReducerRegistry,
    config: LedgerConfig,
}

impl std::fmt::Debug for TaskLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskLedger {
    /// Create a ledger with the store selected by `config`.
    pub async fn new(config: LedgerConfig) -> LedgerResult<Self> {
        config
            .validate()
            .map_err(|errors| LedgerError::config(errors.join("; ")))?;

        let store = StoreFactory::from_config(&config.store).await?;
        Ok(Self::with_store(config, store))
    }

    /// Create a ledger over an existing store.
    pub fn with_store(config: LedgerConfig, store: SharedStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            reducers: ReducerRegistry::with_builtins(),
            config,
        }
    }

    /// Replace the time source.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: Arc<C>) -> Self {
        self.clock = clock;
        self
    }

    /// Reducers available to groups submitted through this ledger
    pub fn reducers(&self) -> &ReducerRegistry {
        &self.reducers
    }

    /// Get the configuration used by this ledger.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Create a PENDING record for a freshly dispatched task.
    ///
    /// Fails with `DuplicateTask` if the id was already submitted.
    pub async fn on_submit(
        &self,
        task_id: &str,
        name: &str,
        args: Value,
        kwargs: Value,
    ) -> LedgerResult<TaskRecord> {
        let record = TaskRecord::new(task_id, name, args, kwargs, self.clock.now());
        self.store.insert_task(record.clone()).await?;

        info!(task_id, name, "Task submitted");
        Ok(record)
    }

    /// PENDING or RETRY → STARTED
    pub async fn on_start(&self, task_id: &str) -> LedgerResult<Transition> {
        let (record, transition) = self
            .update_task(task_id, |record, now| lifecycle::start(record, now))
            .await?;

        if transition == Transition::Applied {
            debug!(task_id, attempt = record.retry_count + 1, "Task started");
        }
        Ok(transition)
    }

    /// STARTED → SUCCESS.
    ///
    /// A repeat with the same result is a no-op; a different result fails
    /// with `InconsistentResult`.
    pub async fn on_success(&self, task_id: &str, result: Value) -> LedgerResult<Transition> {
        let (record, transition) = self
            .update_task(task_id, |record, now| lifecycle::succeed(record, &result, now))
            .await?;

        if transition == Transition::Applied {
            info!(task_id, duration = ?record.duration(), "Task succeeded");
        }
        Ok(transition)
    }

    /// STARTED → FAILURE, with the same repeat rule as [`on_success`](Self::on_success).
    pub async fn on_failure(&self, task_id: &str, error: ErrorDetail) -> LedgerResult<Transition> {
        let (record, transition) = self
            .update_task(task_id, |record, now| lifecycle::fail(record, &error, now))
            .await?;

        if transition == Transition::Applied {
            warn!(
                task_id,
                error = %error,
                duration = ?record.duration(),
                "Task failed"
            );
        }
        Ok(transition)
    }

    /// STARTED → RETRY, appending `reason` to the capped retry history.
    pub async fn on_retry(&self, task_id: &str, reason: &str) -> LedgerResult<Transition> {
        let cap = self.config.tracker.retry_history_cap;
        let (record, transition) = self
            .update_task(task_id, |record, now| lifecycle::retry(record, reason, cap, now))
            .await?;

        if transition == Transition::Applied {
            warn!(task_id, reason, retry_count = record.retry_count, "Task will retry");
        }
        Ok(transition)
    }

    /// Any non-terminal status → REVOKED.
    ///
    /// Only marks the record; a worker already running the task is not
    /// stopped.
    pub async fn on_revoke(&self, task_id: &str) -> LedgerResult<Transition> {
        let (_, transition) = self
            .update_task(task_id, |record, now| lifecycle::revoke(record, now))
            .await?;

        if transition == Transition::Applied {
            info!(task_id, "Task revoked");
        }
        Ok(transition)
    }

    /// Side-channel progress push from a running task
    pub async fn on_progress(
        &self,
        task_id: &str,
        current: i64,
        total: i64,
    ) -> LedgerResult<Transition> {
        let (_, transition) = self
            .update_task(task_id, |record, now| {
                lifecycle::progress(record, current, total, now)
            })
            .await?;

        if transition == Transition::Applied {
            debug!(task_id, current, total, "Task progress");
        }
        Ok(transition)
    }

    /// Current status, timestamps and derived duration.
    pub async fn get_status(&self, task_id: &str) -> LedgerResult<StatusReport> {
        Ok(self.get_record(task_id).await?.status_report())
    }

    /// Last pushed progress; percent is `None` when indeterminate.
    pub async fn get_progress(&self, task_id: &str) -> LedgerResult<ProgressReport> {
        Ok(self.get_record(task_id).await?.progress_report())
    }

    /// Full stored record.
    pub async fn get_record(&self, task_id: &str) -> LedgerResult<TaskRecord> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| LedgerError::unknown_task(task_id))
    }

    /// Tasks in `status`, newest first.
    pub async fn tasks_by_status(
        &self,
        status: TaskStatus,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<TaskRecord>> {
        self.store.tasks_by_status(status, limit).await
    }

    /// Counts per status and the `recent_limit` newest tasks.
    pub async fn overview(&self, recent_limit: usize) -> LedgerResult<LedgerOverview> {
        let (stats, recent) = futures::try_join!(
            self.store.stats(),
            self.store.recent_tasks(recent_limit)
        )?;

        Ok(LedgerOverview {
            stats,
            recent: recent.iter().map(TaskRecord::status_report).collect(),
        })
    }

    /// Remove terminal tasks and finalized groups older than `max_age`.
    ///
    /// Records that are still in flight are never removed.
    pub async fn cleanup(&self, max_age: Duration) -> LedgerResult<PurgeStats> {
        let max_age = TimeDelta::from_std(max_age)
            .map_err(|_| LedgerError::config(format!("Retention age {max_age:?} is too large")))?;
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let purged = self.store.purge_finished_before(cutoff).await?;
        info!(
            %cutoff,
            tasks_removed = purged.tasks_removed,
            groups_removed = purged.groups_removed,
            "Retention cleanup finished"
        );
        Ok(purged)
    }

    /// Perform a health check on the backing store.
    pub async fn health_check(&self) -> LedgerResult<()> {
        self.store.health_check().await
    }

    /// Create a PENDING aggregate for a fan-out group.
    ///
    /// `reducer` must name a reducer registered with this ledger. The order
    /// of `child_task_ids` is the order the reducer will see results in.
    pub async fn on_group_submit(
        &self,
        group_id: &str,
        child_task_ids: Vec<TaskId>,
        reducer: &str,
    ) -> LedgerResult<GroupReport> {
        aggregate::validate_children(group_id, &child_task_ids)?;

        if !self.reducers.contains(reducer).await {
            return Err(LedgerError::UnknownReducer {
                name: reducer.to_string(),
            });
        }

        let record = AggregateRecord::new(group_id, child_task_ids, reducer, self.clock.now());
        self.store.insert_group(record.clone()).await?;

        info!(
            group_id,
            reducer,
            expected_count = record.expected_count,
            "Group submitted"
        );
        Ok(record.report())
    }

    /// Report one child's terminal outcome to its group.
    ///
    /// The call that completes the group also finalizes it. Exactly one
    /// caller can win that race.
    ///
    /// When the child has a task record, the outcome must agree with it:
    /// a child that is not terminal yet fails with `InvalidTransition`, and a
    /// status or payload that differs from the record fails with
    /// `InconsistentResult`.
    pub async fn on_child_terminal(
        &self,
        group_id: &str,
        task_id: &str,
        outcome: ChildOutcome,
    ) -> LedgerResult<GroupReport> {
        if let Some(child) = self.store.get_task(task_id).await? {
            aggregate::check_child_record(&child, &outcome)?;
        }

        let attempts = self.config.tracker.max_update_attempts;

        for attempt in 1..=attempts {
            let current = self
                .store
                .get_group(group_id)
                .await?
                .ok_or_else(|| LedgerError::unknown_group(group_id))?;
            let reducer = self.reducers.get(&current.reducer).await;

            let mut next = current.clone();
            let transition = aggregate::record_child(
                &mut next,
                task_id,
                &outcome,
                reducer.as_deref(),
                self.clock.now(),
            )?;

            if transition == Transition::Unchanged {
                return Ok(current.report());
            }

            next.version = current.version + 1;
            if self.store.replace_group(next.clone(), current.version).await? {
                debug!(
                    group_id,
                    task_id,
                    completed = next.completed_count,
                    expected = next.expected_count,
                    "Child result recorded"
                );
                if next.status.is_terminal() {
                    info!(group_id, status = %next.status, "Group finalized");
                }
                return Ok(next.report());
            }

            debug!(group_id, task_id, attempt, "Group changed concurrently, retrying");
        }

        warn!(group_id, attempts, "Giving up on contended group update");
        Err(LedgerError::ConcurrentModification {
            key: group_id.to_string(),
            attempts,
        })
    }

    /// Aggregate status of a group.
    pub async fn get_group_status(&self, group_id: &str) -> LedgerResult<GroupReport> {
        Ok(self.get_group(group_id).await?.report())
    }

    /// Children of a group, in submission order.
    ///
    /// Children without a task record are skipped.
    pub async fn group_children(&self, group_id: &str) -> LedgerResult<Vec<StatusReport>> {
        let group = self.get_group(group_id).await?;
        let lookups = group
            .child_task_ids
            .iter()
            .map(|task_id| self.store.get_task(task_id));

        let children = futures::future::try_join_all(lookups).await?;
        Ok(children
            .into_iter()
            .flatten()
            .map(|record| record.status_report())
            .collect())
    }

    async fn get_group(&self, group_id: &str) -> LedgerResult<AggregateRecord> {
        self.store
            .get_group(group_id)
            .await?
            .ok_or_else(|| LedgerError::unknown_group(group_id))
    }

    /// Apply `transition` to the stored record with optimistic retries.
    ///
    /// Returns the record as it stands after the call.
    async fn update_task<F>(
        &self,
        task_id: &str,
        transition: F,
    ) -> LedgerResult<(TaskRecord, Transition)>
    where
        F: Fn(&mut TaskRecord, DateTime<Utc>) -> LedgerResult<Transition> + Send,
    {
        let attempts = self.config.tracker.max_update_attempts;

        for attempt in 1..=attempts {
            let current = self.get_record(task_id).await?;

            let mut next = current.clone();
            if transition(&mut next, self.clock.now())? == Transition::Unchanged {
                debug!(task_id, status = %current.status, "Duplicate callback ignored");
                return Ok((current, Transition::Unchanged));
            }

            next.version = current.version + 1;
            if self.store.replace_task(next.clone(), current.version).await? {
                return Ok((next, Transition::Applied));
            }

            debug!(task_id, attempt, "Task changed concurrently, retrying");
        }

        warn!(task_id, attempts, "Giving up on contended task update");
        Err(LedgerError::ConcurrentModification {
            key: task_id.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::group::AggregateStatus;
    use crate::store::InMemoryStore;
    use crate::store::RecordStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    /// Store whose task compare-and-set never wins.
    struct ContendedStore(InMemoryStore);

    #[async_trait]
    impl RecordStore for ContendedStore {
        async fn insert_task(&self, record: TaskRecord) -> LedgerResult<()> {
            self.0.insert_task(record).await
        }

        async fn get_task(&self, task_id: &str) -> LedgerResult<Option<TaskRecord>> {
            self.0.get_task(task_id).await
        }

        async fn replace_task(&self, _record: TaskRecord, _expected: u64) -> LedgerResult<bool> {
            Ok(false)
        }

        async fn insert_group(&self, record: AggregateRecord) -> LedgerResult<()> {
            self.0.insert_group(record).await
        }

        async fn get_group(&self, group_id: &str) -> LedgerResult<Option<AggregateRecord>> {
            self.0.get_group(group_id).await
        }

        async fn replace_group(
            &self,
            record: AggregateRecord,
            expected_version: u64,
        ) -> LedgerResult<bool> {
            self.0.replace_group(record, expected_version).await
        }

        async fn tasks_by_status(
            &self,
            status: TaskStatus,
            limit: Option<usize>,
        ) -> LedgerResult<Vec<TaskRecord>> {
            self.0.tasks_by_status(status, limit).await
        }

        async fn recent_tasks(&self, limit: usize) -> LedgerResult<Vec<TaskRecord>> {
            self.0.recent_tasks(limit).await
        }

        async fn stats(&self) -> LedgerResult<StoreStats> {
            self.0.stats().await
        }

        async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<PurgeStats> {
            self.0.purge_finished_before(cutoff).await
        }

        async fn health_check(&self) -> LedgerResult<()> {
            self.0.health_check().await
        }
    }

    fn ledger() -> (TaskLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let ledger = TaskLedger::with_store(LedgerConfig::testing(), Arc::new(InMemoryStore::new()))
            .with_clock(Arc::clone(&clock));
        (ledger, clock)
    }

    async fn submit(ledger: &TaskLedger, task_id: &str) {
        ledger
            .on_submit(task_id, "app.tasks.add", json!([4, 4]), json!({}))
            .await
            .unwrap();
    }

    async fn run_to_success(ledger: &TaskLedger, task_id: &str, result: Value) {
        submit(ledger, task_id).await;
        ledger.on_start(task_id).await.unwrap();
        ledger.on_success(task_id, result).await.unwrap();
    }

    #[tokio::test]
    async fn test_success_reports_duration() {
        let (ledger, clock) = ledger();
        submit(&ledger, "t1").await;
        ledger.on_start("t1").await.unwrap();
        clock.advance(Duration::from_secs(2));
        ledger.on_success("t1", json!(8)).await.unwrap();

        let status = ledger.get_status("t1").await.unwrap();
        assert_eq!(status.status, TaskStatus::Success);
        assert_eq!(status.result, Some(json!(8)));
        assert_eq!(status.duration, Some(Duration::from_secs(2)));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_submit_is_rejected() {
        let (ledger, _) = ledger();
        submit(&ledger, "t1").await;

        let err = ledger
            .on_submit("t1", "app.tasks.add", json!([]), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTask { .. }));
    }

    #[tokio::test]
    async fn test_repeated_success_is_noop() {
        let (ledger, clock) = ledger();
        run_to_success(&ledger, "t1", json!(8)).await;
        let before = ledger.get_record("t1").await.unwrap();

        clock.advance(Duration::from_secs(5));
        let transition = assert_ok!(ledger.on_success("t1", json!(8)).await);
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(ledger.get_record("t1").await.unwrap(), before);

        let err = assert_err!(ledger.on_success("t1", json!(9)).await);
        assert!(matches!(err, LedgerError::InconsistentResult { .. }));
        assert_eq!(ledger.get_record("t1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (ledger, _) = ledger();
        let err = assert_err!(ledger.on_start("unknown_id").await);
        assert!(matches!(err, LedgerError::UnknownTask { task_id } if task_id == "unknown_id"));
        assert!(ledger.get_status("unknown_id").await.is_err());
        assert!(ledger.get_progress("unknown_id").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_record_unchanged() {
        let (ledger, _) = ledger();
        submit(&ledger, "t1").await;
        let before = ledger.get_record("t1").await.unwrap();

        let err = assert_err!(ledger.on_success("t1", json!(1)).await);
        assert!(matches!(
            err,
            LedgerError::InvalidTransition { status: TaskStatus::Pending, .. }
        ));
        assert!(ledger.on_retry("t1", "nope").await.is_err());
        assert_eq!(ledger.get_record("t1").await.unwrap(), before);

        ledger.on_revoke("t1").await.unwrap();
        assert!(ledger.on_start("t1").await.is_err());
        assert_eq!(
            ledger.get_status("t1").await.unwrap().status,
            TaskStatus::Revoked
        );
    }

    #[tokio::test]
    async fn test_failure_and_retry_flow() {
        let (ledger, clock) = ledger();
        submit(&ledger, "email").await;

        for attempt in 0..5 {
            ledger.on_start("email").await.unwrap();
            clock.advance(Duration::from_secs(1));
            ledger
                .on_retry("email", &format!("smtp timeout #{attempt}"))
                .await
                .unwrap();
        }

        ledger.on_start("email").await.unwrap();
        clock.advance(Duration::from_secs(3));
        let error = ErrorDetail::new("SMTPException", "mailbox unavailable");
        ledger.on_failure("email", error.clone()).await.unwrap();

        let record = ledger.get_record("email").await.unwrap();
        assert_eq!(record.status, TaskStatus::Failure);
        assert_eq!(record.error_detail, Some(error));
        assert!(record.result_snapshot.is_none());
        assert_eq!(record.retry_count, 5);
        // Testing preset keeps the last three reasons
        assert_eq!(record.retry_history.len(), 3);
        assert_eq!(record.retry_history[0].reason, "smtp timeout #2");
        assert_eq!(record.duration(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_update_gives_up_after_max_attempts() {
        let mut config = LedgerConfig::testing();
        config.tracker = config.tracker.with_max_update_attempts(3);
        let ledger = TaskLedger::with_store(config, Arc::new(ContendedStore(InMemoryStore::new())));
        submit(&ledger, "t1").await;

        let err = assert_err!(ledger.on_start("t1").await);
        assert!(matches!(
            err,
            LedgerError::ConcurrentModification { key, attempts: 3 } if key == "t1"
        ));
        assert_eq!(
            ledger.get_status("t1").await.unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_progress() {
        let (ledger, _) = ledger();
        submit(&ledger, "report").await;

        let progress = ledger.get_progress("report").await.unwrap();
        assert_eq!(progress.percent, None);

        ledger.on_start("report").await.unwrap();
        assert_eq!(
            ledger.on_progress("report", 25, 100).await.unwrap(),
            Transition::Applied
        );
        assert_eq!(
            ledger.on_progress("report", 25, 100).await.unwrap(),
            Transition::Unchanged
        );
        let progress = ledger.get_progress("report").await.unwrap();
        assert_eq!((progress.current, progress.total), (25, 100));
        assert_eq!(progress.percent, Some(25.0));

        ledger.on_progress("report", 5, 0).await.unwrap();
        assert_eq!(ledger.get_progress("report").await.unwrap().percent, None);

        ledger.on_success("report", json!("report.pdf")).await.unwrap();
        assert!(ledger.on_progress("report", 100, 100).await.is_err());
    }

    #[tokio::test]
    async fn test_group_sums_in_submission_order() {
        let (ledger, _) = ledger();
        ledger
            .on_group_submit("g1", vec!["c1".into(), "c2".into()], "sum")
            .await
            .unwrap();

        let report = ledger
            .on_child_terminal("g1", "c2", ChildOutcome::Success(json!(5)))
            .await
            .unwrap();
        assert_eq!(report.status, AggregateStatus::Pending);
        assert_eq!(report.percent_complete(), 50.0);

        let report = ledger
            .on_child_terminal("g1", "c1", ChildOutcome::Success(json!(3)))
            .await
            .unwrap();
        assert_eq!(report.status, AggregateStatus::Success);
        assert_eq!(report.aggregated_result, Some(json!(8)));
        assert_eq!(ledger.get_group_status("g1").await.unwrap(), report);
    }

    #[tokio::test]
    async fn test_group_partial_failure() {
        let (ledger, _) = ledger();
        ledger
            .on_group_submit("g1", vec!["c1".into(), "c2".into()], "sum")
            .await
            .unwrap();

        ledger
            .on_child_terminal("g1", "c1", ChildOutcome::Success(json!(3)))
            .await
            .unwrap();
        let report = ledger
            .on_child_terminal(
                "g1",
                "c2",
                ChildOutcome::Failure(ErrorDetail::new("ValueError", "bad chunk")),
            )
            .await
            .unwrap();

        assert_eq!(report.status, AggregateStatus::PartialFailure);
        assert_eq!(report.aggregated_result, None);
        assert_eq!(report.failed_children, vec!["c2"]);

        let err = assert_err!(
            ledger
                .on_child_terminal("g1", "c2", ChildOutcome::Success(json!(1)))
                .await
        );
        assert!(matches!(err, LedgerError::OverCompleteGroup { .. }));
    }

    #[tokio::test]
    async fn test_child_outcome_must_match_task_record() {
        let (ledger, _) = ledger();
        let error = ErrorDetail::new("ValueError", "bad chunk");
        run_to_success(&ledger, "c1", json!(3)).await;
        submit(&ledger, "c2").await;
        ledger.on_start("c2").await.unwrap();
        submit(&ledger, "c3").await;
        ledger
            .on_group_submit("g1", vec!["c1".into(), "c2".into(), "c3".into()], "sum")
            .await
            .unwrap();

        let err = assert_err!(
            ledger
                .on_child_terminal("g1", "c2", ChildOutcome::Failure(error.clone()))
                .await
        );
        assert!(matches!(
            err,
            LedgerError::InvalidTransition { status: TaskStatus::Started, .. }
        ));

        ledger.on_failure("c2", error.clone()).await.unwrap();
        ledger.on_revoke("c3").await.unwrap();

        for (child, outcome) in [
            ("c1", ChildOutcome::Success(json!(100))),
            ("c2", ChildOutcome::Success(json!(5))),
            ("c3", ChildOutcome::Success(json!(0))),
        ] {
            let err = assert_err!(ledger.on_child_terminal("g1", child, outcome).await);
            assert!(matches!(err, LedgerError::InconsistentResult { task_id } if task_id == child));
        }
        assert_eq!(ledger.get_group_status("g1").await.unwrap().completed_count, 0);

        ledger
            .on_child_terminal("g1", "c1", ChildOutcome::Success(json!(3)))
            .await
            .unwrap();
        ledger
            .on_child_terminal("g1", "c2", ChildOutcome::Failure(error))
            .await
            .unwrap();
        let report = ledger
            .on_child_terminal(
                "g1",
                "c3",
                ChildOutcome::Failure(ErrorDetail::new("Revoked", "revoked before start")),
            )
            .await
            .unwrap();

        assert_eq!(report.status, AggregateStatus::PartialFailure);
        assert_eq!(report.failed_children, vec!["c2", "c3"]);
        assert_eq!(report.aggregated_result, None);
    }

    #[tokio::test]
    async fn test_group_submit_validation() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.on_group_submit("g0", vec![], "sum").await,
            Err(LedgerError::EmptyGroup { .. })
        ));
        assert!(matches!(
            ledger
                .on_group_submit("g1", vec!["c1".into()], "median")
                .await,
            Err(LedgerError::UnknownReducer { .. })
        ));

        ledger
            .on_group_submit("g1", vec!["c1".into()], "collect")
            .await
            .unwrap();
        assert!(matches!(
            ledger.on_group_submit("g1", vec!["c1".into()], "sum").await,
            Err(LedgerError::DuplicateGroup { .. })
        ));
        assert!(matches!(
            ledger.get_group_status("missing").await,
            Err(LedgerError::UnknownGroup { .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_reducer() {
        let (ledger, _) = ledger();
        ledger
            .reducers()
            .register(FnReducer::new("join_lines", |results: &[Value]| {
                let lines: Vec<&str> = results.iter().filter_map(Value::as_str).collect();
                Ok(Value::String(lines.join("\n")))
            }))
            .await;

        ledger
            .on_group_submit("report", vec!["a".into(), "b".into()], "join_lines")
            .await
            .unwrap();
        ledger
            .on_child_terminal("report", "b", ChildOutcome::Success(json!("second")))
            .await
            .unwrap();
        let report = ledger
            .on_child_terminal("report", "a", ChildOutcome::Success(json!("first")))
            .await
            .unwrap();
        assert_eq!(report.aggregated_result, Some(json!("first\nsecond")));
    }

    #[tokio::test]
    async fn test_aggregate_is_independent_of_completion_order() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let children = ["c1", "c2", "c3"];
        let values = [json!("a"), json!("b"), json!("c")];

        let (ledger, _) = ledger();
        let mut results = Vec::new();
        for (run, order) in orders.iter().enumerate() {
            let group_id = format!("g{run}");
            ledger
                .on_group_submit(
                    &group_id,
                    children.iter().map(|c| c.to_string()).collect(),
                    "collect",
                )
                .await
                .unwrap();

            for &index in order {
                ledger
                    .on_child_terminal(
                        &group_id,
                        children[index],
                        ChildOutcome::Success(values[index].clone()),
                    )
                    .await
                    .unwrap();
            }
            results.push(ledger.get_group_status(&group_id).await.unwrap().aggregated_result);
        }

        assert!(results.iter().all(|r| r == &Some(json!(["a", "b", "c"]))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_success_callbacks_apply_once() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        submit(&ledger, "t1").await;
        ledger.on_start("t1").await.unwrap();

        let handles = (0..16).map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.on_success("t1", json!(8)).await })
        });
        let outcomes = futures::future::join_all(handles).await;

        let applied = outcomes
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(|transition| *transition == Transition::Applied)
            .count();
        assert_eq!(applied, 1);

        let record = ledger.get_record("t1").await.unwrap();
        assert_eq!(record.status, TaskStatus::Success);
        // submit, start, success
        assert_eq!(record.version, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_conflicting_results_surface_errors() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        submit(&ledger, "t1").await;
        ledger.on_start("t1").await.unwrap();

        let handles = (0..8).map(|i| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.on_success("t1", json!(i)).await })
        });
        let outcomes: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes.iter().filter_map(|o| o.as_ref().err()).all(|err| matches!(
            err,
            LedgerError::InconsistentResult { .. }
        )));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_children_finalize_once() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        let children: Vec<TaskId> = (0..20).map(|i| format!("chunk-{i}")).collect();
        ledger
            .on_group_submit("batch", children.clone(), "sum")
            .await
            .unwrap();

        let handles = children.iter().enumerate().map(|(i, child)| {
            let ledger = Arc::clone(&ledger);
            let child = child.clone();
            tokio::spawn(async move {
                ledger
                    .on_child_terminal("batch", &child, ChildOutcome::Success(json!(i)))
                    .await
            })
        });
        let reports: Vec<GroupReport> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let finalizing = reports.iter().filter(|r| r.status.is_terminal()).count();
        assert_eq!(finalizing, 1);

        let report = ledger.get_group_status("batch").await.unwrap();
        assert_eq!(report.completed_count, 20);
        assert_eq!(report.aggregated_result, Some(json!(190)));
    }

    #[tokio::test]
    async fn test_group_children_in_submission_order() {
        let (ledger, _) = ledger();
        run_to_success(&ledger, "c2", json!(5)).await;
        run_to_success(&ledger, "c1", json!(3)).await;
        ledger
            .on_group_submit("g1", vec!["c1".into(), "c2".into(), "never".into()], "sum")
            .await
            .unwrap();

        let children = ledger.group_children("g1").await.unwrap();
        let ids: Vec<_> = children.iter().map(|c| c.task_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_overview_and_queries() {
        let (ledger, clock) = ledger();
        for i in 0..4 {
            clock.advance(Duration::from_secs(1));
            submit(&ledger, &format!("t{i}")).await;
        }
        ledger.on_start("t1").await.unwrap();
        ledger.on_start("t3").await.unwrap();
        ledger.on_revoke("t0").await.unwrap();

        let started = ledger
            .tasks_by_status(TaskStatus::Started, None)
            .await
            .unwrap();
        let ids: Vec<_> = started.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t1"]);

        let overview = ledger.overview(2).await.unwrap();
        assert_eq!(overview.stats.started, 2);
        assert_eq!(overview.stats.pending, 1);
        assert_eq!(overview.stats.revoked, 1);
        assert_eq!(overview.recent.len(), 2);
        assert_eq!(overview.recent[0].task_id, "t3");
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_terminal_records() {
        let (ledger, clock) = ledger();
        run_to_success(&ledger, "old", json!(1)).await;
        submit(&ledger, "stuck").await;
        ledger
            .on_group_submit("g1", vec!["old".into()], "sum")
            .await
            .unwrap();
        ledger
            .on_child_terminal("g1", "old", ChildOutcome::Success(json!(1)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(8 * 24 * 3600));
        run_to_success(&ledger, "fresh", json!(2)).await;

        let purged = ledger
            .cleanup(Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(purged.tasks_removed, 1);
        assert_eq!(purged.groups_removed, 1);

        assert!(ledger.get_record("old").await.is_err());
        assert!(ledger.get_record("stuck").await.is_ok());
        assert!(ledger.get_record("fresh").await.is_ok());
        assert_ok!(ledger.health_check().await);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = LedgerConfig::testing();
        config.tracker.max_update_attempts = 0;
        let err = TaskLedger::new(config).await.unwrap_err();
        assert!(matches!(err, LedgerError::Config { .. }));

        let ledger = TaskLedger::new(LedgerConfig::default()).await.unwrap();
        assert_eq!(ledger.reducers().names().await, vec!["collect", "sum"]);
    }
}

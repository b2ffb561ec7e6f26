//! Aggregate records for fan-out/fan-in task groups.

use crate::task::{ErrorDetail, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier shared by all children of one fan-out
pub type GroupId = String;

/// Status of an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateStatus {
    /// Some children are still running
    Pending,
    /// Every child succeeded and the reducer produced a result
    Success,
    /// Every child is terminal and at least one failed
    PartialFailure,
    /// Every child succeeded but the reducer rejected their results
    ReducerFailed,
}

impl AggregateStatus {
    /// Check if the aggregate has been finalized
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::ReducerFailed => "REDUCER_FAILED",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one child, as reported to the group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildOutcome {
    /// Child finished with this result
    Success(Value),
    /// Child failed
    Failure(ErrorDetail),
}

impl ChildOutcome {
    /// Task status this outcome corresponds to
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Success(_) => TaskStatus::Success,
            Self::Failure(_) => TaskStatus::Failure,
        }
    }

    /// Check if the child succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Bookkeeping for one fan-out group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Group id
    pub group_id: GroupId,
    /// Children in submission order; the reducer always follows this order
    pub child_task_ids: Vec<TaskId>,
    /// Name of the registered reducer
    pub reducer: String,
    /// Number of children submitted
    pub expected_count: usize,
    /// Number of children that reported a terminal outcome
    pub completed_count: usize,
    /// Outcomes received so far, keyed by child id
    pub outcomes: BTreeMap<TaskId, ChildOutcome>,
    /// Current status
    pub status: AggregateStatus,
    /// Reducer output, set once the group is SUCCESS
    pub aggregated_result: Option<Value>,
    /// Children that failed, in submission order
    pub failed_children: Vec<TaskId>,
    /// Reducer error message when REDUCER_FAILED
    pub reducer_error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// When the last child completed
    pub finalized_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter
    pub version: u64,
}

impl AggregateRecord {
    /// Create a PENDING aggregate for the given children
    pub fn new(
        group_id: impl Into<GroupId>,
        child_task_ids: Vec<TaskId>,
        reducer: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            expected_count: child_task_ids.len(),
            child_task_ids,
            reducer: reducer.into(),
            completed_count: 0,
            outcomes: BTreeMap::new(),
            status: AggregateStatus::Pending,
            aggregated_result: None,
            failed_children: Vec::new(),
            reducer_error: None,
            created_at,
            finalized_at: None,
            version: 0,
        }
    }

    /// Check if the task was submitted as part of this group
    pub fn is_member(&self, task_id: &str) -> bool {
        self.child_task_ids.iter().any(|child| child == task_id)
    }

    /// Snapshot for the aggregate query path
    pub fn report(&self) -> GroupReport {
        GroupReport {
            group_id: self.group_id.clone(),
            status: self.status,
            reducer: self.reducer.clone(),
            expected_count: self.expected_count,
            completed_count: self.completed_count,
            aggregated_result: self.aggregated_result.clone(),
            failed_children: self.failed_children.clone(),
            reducer_error: self.reducer_error.clone(),
            created_at: self.created_at,
            finalized_at: self.finalized_at,
        }
    }
}

/// Result of [`get_group_status`](crate::core::TaskLedger::get_group_status)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    /// Group id
    pub group_id: GroupId,
    /// Current status
    pub status: AggregateStatus,
    /// Reducer name
    pub reducer: String,
    /// Children submitted
    pub expected_count: usize,
    /// Children completed
    pub completed_count: usize,
    /// Reducer output when SUCCESS
    pub aggregated_result: Option<Value>,
    /// Failed children in submission order
    pub failed_children: Vec<TaskId>,
    /// Reducer error when REDUCER_FAILED
    pub reducer_error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Finalization time
    pub finalized_at: Option<DateTime<Utc>>,
}

impl GroupReport {
    /// Share of children completed, in `[0, 100]`
    pub fn percent_complete(&self) -> f64 {
        if self.expected_count == 0 {
            return 0.0;
        }
        self.completed_count as f64 / self.expected_count as f64 * 100.0
    }
}

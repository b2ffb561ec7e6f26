//! Task records and the values reported about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Unique identifier for a task, assigned by the dispatcher
pub type TaskId = String;

/// Generate a fresh random task or group id.
pub fn generate_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted, not yet picked up by a worker
    Pending,
    /// A worker is executing the task
    Started,
    /// Finished with a result
    Success,
    /// Finished with an error
    Failure,
    /// Failed an attempt and is waiting to run again
    Retry,
    /// Cancelled before finishing
    Revoked,
}

impl TaskStatus {
    /// Every status, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Started,
        Self::Success,
        Self::Failure,
        Self::Retry,
        Self::Revoked,
    ];

    /// Check if no further transition can leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Upper-case name used in logs and serialized records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Retry => "RETRY",
            Self::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid task status: {s}"))
    }
}

/// Serialized description of why a task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error kind, e.g. the exception or error type name
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Short trace or cause chain, if the worker captured one
    pub trace: Option<String>,
}

impl ErrorDetail {
    /// Create an error detail without a trace
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Attach a trace summary
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Capture a Rust error, using its `source()` chain as the trace.
    pub fn from_error<E>(kind: impl Into<String>, error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: kind.into(),
            message: error.to_string(),
            trace: (!causes.is_empty()).then(|| causes.join(" <- ")),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One entry of a task's retry log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    /// Reason given by the dispatcher
    pub reason: String,
    /// When the retry was recorded
    pub at: DateTime<Utc>,
}

/// Last progress value pushed by a running task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Units of work done
    pub current: i64,
    /// Units of work expected
    pub total: i64,
    /// When the value was pushed
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// `current / total * 100`, clamped to `[0, 100]`.
    ///
    /// `None` means indeterminate (`total <= 0`).
    pub fn percent(&self) -> Option<f64> {
        if self.total <= 0 {
            return None;
        }
        let percent = self.current as f64 / self.total as f64 * 100.0;
        Some(percent.clamp(0.0, 100.0))
    }
}

/// Persisted state of one dispatched unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Dispatcher-assigned id
    pub task_id: TaskId,
    /// Name of the task definition that was invoked
    pub name: String,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Positional inputs at submission time
    pub args_snapshot: Value,
    /// Keyword inputs at submission time
    pub kwargs_snapshot: Value,
    /// Output, only set in SUCCESS
    pub result_snapshot: Option<Value>,
    /// Failure, only set in FAILURE
    pub error_detail: Option<ErrorDetail>,
    /// When the record was submitted
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of retries recorded, never capped
    pub retry_count: u32,
    /// Most recent retry reasons, oldest dropped first
    pub retry_history: Vec<RetryEntry>,
    /// Last progress pushed through the side channel
    pub progress: Option<ProgressSnapshot>,
    /// Optimistic concurrency counter, bumped on every stored change
    pub version: u64,
}

impl TaskRecord {
    /// Create a fresh PENDING record
    pub fn new(
        task_id: impl Into<TaskId>,
        name: impl Into<String>,
        args: Value,
        kwargs: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            status: TaskStatus::Pending,
            args_snapshot: args,
            kwargs_snapshot: kwargs,
            result_snapshot: None,
            error_detail: None,
            created_at,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            retry_history: Vec::new(),
            progress: None,
            version: 0,
        }
    }

    /// `finished_at - started_at` when both are set.
    ///
    /// Always derived from the stored timestamps, never cached.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => (finished - started).to_std().ok(),
            _ => None,
        }
    }

    /// Snapshot for the status query path
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            task_id: self.task_id.clone(),
            name: self.name.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration: self.duration(),
            result: self.result_snapshot.clone(),
            error: self.error_detail.clone(),
            retry_count: self.retry_count,
        }
    }

    /// Snapshot for the progress query path
    pub fn progress_report(&self) -> ProgressReport {
        let (current, total, percent) = match &self.progress {
            Some(progress) => (progress.current, progress.total, progress.percent()),
            None => (0, 0, None),
        };

        ProgressReport {
            task_id: self.task_id.clone(),
            status: self.status,
            current,
            total,
            percent,
        }
    }
}

/// Result of [`get_status`](crate::core::TaskLedger::get_status)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Task id
    pub task_id: TaskId,
    /// Task definition name
    pub name: String,
    /// Current status
    pub status: TaskStatus,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time
    pub finished_at: Option<DateTime<Utc>>,
    /// Derived run time
    pub duration: Option<Duration>,
    /// Output when SUCCESS
    pub result: Option<Value>,
    /// Failure when FAILURE
    pub error: Option<ErrorDetail>,
    /// Retries seen so far
    pub retry_count: u32,
}

/// Result of [`get_progress`](crate::core::TaskLedger::get_progress)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Task id
    pub task_id: TaskId,
    /// Current status
    pub status: TaskStatus,
    /// Units done, 0 if nothing was pushed
    pub current: i64,
    /// Units expected, 0 if nothing was pushed
    pub total: i64,
    /// Percentage in `[0, 100]`, `None` when indeterminate
    pub percent: Option<f64>,
}

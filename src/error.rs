//! Error types for ledger operations.

use crate::task::{TaskId, TaskStatus};
use thiserror::Error;

/// Result type used throughout the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A record with this task id was already submitted
    #[error("Task '{task_id}' was already submitted")]
    DuplicateTask {
        /// The duplicated task id
        task_id: TaskId,
    },

    /// No record exists for this task id
    #[error("Task '{task_id}' is not known to the ledger")]
    UnknownTask {
        /// The missing task id
        task_id: TaskId,
    },

    /// The requested transition is not allowed from the current status
    #[error("Cannot apply '{operation}' to task '{task_id}' in status {status}")]
    InvalidTransition {
        /// Task the transition was attempted on
        task_id: TaskId,
        /// Status the record was in
        status: TaskStatus,
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// A repeated terminal callback carried a different payload
    #[error("Task '{task_id}' already finished with a different outcome")]
    InconsistentResult {
        /// Task whose outcome disagreed
        task_id: TaskId,
    },

    /// A group was submitted without children
    #[error("Group '{group_id}' has no children")]
    EmptyGroup {
        /// The empty group
        group_id: String,
    },

    /// A child reported after every expected child had already completed
    #[error("Group '{group_id}' already received all {expected_count} child results")]
    OverCompleteGroup {
        /// The finalized group
        group_id: String,
        /// Number of children the group was submitted with
        expected_count: usize,
    },

    /// A group with this id was already submitted
    #[error("Group '{group_id}' was already submitted")]
    DuplicateGroup {
        /// The duplicated group id
        group_id: String,
    },

    /// No aggregate record exists for this group id
    #[error("Group '{group_id}' is not known to the ledger")]
    UnknownGroup {
        /// The missing group id
        group_id: String,
    },

    /// A child report named a task that is not part of the group
    #[error("Task '{task_id}' is not a member of group '{group_id}'")]
    NotGroupMember {
        /// The group
        group_id: String,
        /// The foreign task id
        task_id: TaskId,
    },

    /// No reducer is registered under this name
    #[error("Reducer '{name}' is not registered")]
    UnknownReducer {
        /// Requested reducer name
        name: String,
    },

    /// Optimistic update lost every race against concurrent writers
    #[error("Record '{key}' kept changing under {attempts} update attempts")]
    ConcurrentModification {
        /// Task or group id
        key: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Store error: {message}")]
    Store {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Background sweeper was started twice
    #[error("Retention sweeper is already running")]
    AlreadyRunning,

    /// Background sweeper was stopped while not running
    #[error("Retention sweeper is not running")]
    NotRunning,

    /// Redis connection error
    #[cfg(feature = "redis-store")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl LedgerError {
    /// Create a store error wrapping its cause
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn unknown_task(task_id: &str) -> Self {
        Self::UnknownTask {
            task_id: task_id.to_string(),
        }
    }

    pub(crate) fn unknown_group(group_id: &str) -> Self {
        Self::UnknownGroup {
            group_id: group_id.to_string(),
        }
    }

    /// True for dispatcher misuse (bad transitions, broken group contract),
    /// false for storage, serialization and configuration failures.
    pub fn is_integration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTask { .. }
                | Self::UnknownTask { .. }
                | Self::InvalidTransition { .. }
                | Self::InconsistentResult { .. }
                | Self::EmptyGroup { .. }
                | Self::OverCompleteGroup { .. }
                | Self::DuplicateGroup { .. }
                | Self::UnknownGroup { .. }
                | Self::NotGroupMember { .. }
                | Self::UnknownReducer { .. }
        )
    }
}

//! Fan-in bookkeeping for a single [`AggregateRecord`].
//!
//! Children may report in any order. Outcomes are stored per child and the
//! reducer only ever sees them in the submission order captured when the
//! group was created, so the aggregated result does not depend on worker
//! scheduling.

use super::lifecycle::Transition;
use super::reducer::Reducer;
use crate::error::{LedgerError, LedgerResult};
use crate::group::{AggregateRecord, AggregateStatus, ChildOutcome};
use crate::task::{TaskId, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// Reject empty child lists and repeated child ids.
pub fn validate_children(group_id: &str, child_task_ids: &[TaskId]) -> LedgerResult<()> {
    if child_task_ids.is_empty() {
        return Err(LedgerError::EmptyGroup {
            group_id: group_id.to_string(),
        });
    }

    let mut seen = HashSet::with_capacity(child_task_ids.len());
    for task_id in child_task_ids {
        if !seen.insert(task_id.as_str()) {
            return Err(LedgerError::DuplicateTask {
                task_id: task_id.clone(),
            });
        }
    }
    Ok(())
}

/// Check a reported outcome against the child's own task record.
///
/// The child must be terminal and the outcome must match what the record
/// holds. A REVOKED child can only be reported as a failure.
pub fn check_child_record(record: &TaskRecord, outcome: &ChildOutcome) -> LedgerResult<()> {
    if !record.status.is_terminal() {
        return Err(LedgerError::InvalidTransition {
            task_id: record.task_id.clone(),
            status: record.status,
            operation: "on_child_terminal",
        });
    }

    let consistent = match (record.status, outcome) {
        (TaskStatus::Success, ChildOutcome::Success(value)) => {
            record.result_snapshot.as_ref() == Some(value)
        }
        (TaskStatus::Failure, ChildOutcome::Failure(error)) => {
            record.error_detail.as_ref() == Some(error)
        }
        (TaskStatus::Revoked, ChildOutcome::Failure(_)) => true,
        _ => false,
    };

    if consistent {
        Ok(())
    } else {
        Err(LedgerError::InconsistentResult {
            task_id: record.task_id.clone(),
        })
    }
}

/// Record one child's terminal outcome, finalizing the group when it is the
/// last one.
///
/// `reducer` is only consulted on finalization of an all-success group; if
/// it is `None` at that point the call fails with `UnknownReducer` and the
/// group stays PENDING.
pub fn record_child(
    record: &mut AggregateRecord,
    task_id: &str,
    outcome: &ChildOutcome,
    reducer: Option<&dyn Reducer>,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    if record.status.is_terminal() {
        return Err(LedgerError::OverCompleteGroup {
            group_id: record.group_id.clone(),
            expected_count: record.expected_count,
        });
    }

    if !record.is_member(task_id) {
        return Err(LedgerError::NotGroupMember {
            group_id: record.group_id.clone(),
            task_id: task_id.to_string(),
        });
    }

    if let Some(previous) = record.outcomes.get(task_id) {
        return if previous == outcome {
            Ok(Transition::Unchanged)
        } else {
            Err(LedgerError::InconsistentResult {
                task_id: task_id.to_string(),
            })
        };
    }

    record.outcomes.insert(task_id.to_string(), outcome.clone());
    record.completed_count += 1;

    if record.completed_count == record.expected_count {
        finalize(record, reducer, now)?;
    }
    Ok(Transition::Applied)
}

fn finalize(
    record: &mut AggregateRecord,
    reducer: Option<&dyn Reducer>,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    let failed_children: Vec<TaskId> = record
        .child_task_ids
        .iter()
        .filter(|child| {
            record
                .outcomes
                .get(child.as_str())
                .is_some_and(|outcome| !outcome.is_success())
        })
        .cloned()
        .collect();

    if !failed_children.is_empty() {
        record.status = AggregateStatus::PartialFailure;
        record.failed_children = failed_children;
        record.finalized_at = Some(now);
        return Ok(());
    }

    let reducer = reducer.ok_or_else(|| LedgerError::UnknownReducer {
        name: record.reducer.clone(),
    })?;

    let results: Vec<Value> = record
        .child_task_ids
        .iter()
        .filter_map(|child| match record.outcomes.get(child.as_str()) {
            Some(ChildOutcome::Success(value)) => Some(value.clone()),
            _ => None,
        })
        .collect();

    match reducer.reduce(&results) {
        Ok(aggregated) => {
            record.status = AggregateStatus::Success;
            record.aggregated_result = Some(aggregated);
        }
        Err(message) => {
            record.status = AggregateStatus::ReducerFailed;
            record.reducer_error = Some(message);
        }
    }
    record.finalized_at = Some(now);
    Ok(())
}

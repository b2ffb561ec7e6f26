//! Lifecycle transitions for a single [`TaskRecord`].
//!
//! ```text
//! PENDING ──start──▶ STARTED ──success──▶ SUCCESS
//!    │                │  ▲   ──failure──▶ FAILURE
//!    │           retry│  │start
//!    │                ▼  │
//!    │               RETRY
//!    └──── revoke (from any non-terminal) ──▶ REVOKED
//! ```
//!
//! Every function here works on a scratch copy of the record. On error the
//! copy is thrown away, so a rejected transition never leaves a trace.
//! Duplicate deliveries that carry the same payload return
//! [`Transition::Unchanged`] and are not written back.

use crate::error::{LedgerError, LedgerResult};
use crate::task::{ErrorDetail, ProgressSnapshot, RetryEntry, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Whether a transition changed the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record changed and must be persisted
    Applied,
    /// Idempotent repeat; nothing to persist
    Unchanged,
}

fn invalid(record: &TaskRecord, operation: &'static str) -> LedgerError {
    LedgerError::InvalidTransition {
        task_id: record.task_id.clone(),
        status: record.status,
        operation,
    }
}

/// Terminal timestamp, never earlier than the start of the attempt.
fn finish_time(record: &TaskRecord, now: DateTime<Utc>) -> DateTime<Utc> {
    match record.started_at {
        Some(started) if started > now => started,
        _ => now,
    }
}

/// PENDING or RETRY → STARTED.
///
/// A repeated start while STARTED keeps the original `started_at`.
pub fn start(record: &mut TaskRecord, now: DateTime<Utc>) -> LedgerResult<Transition> {
    match record.status {
        TaskStatus::Pending | TaskStatus::Retry => {
            record.status = TaskStatus::Started;
            record.started_at = Some(now);
            Ok(Transition::Applied)
        }
        TaskStatus::Started => Ok(Transition::Unchanged),
        _ => Err(invalid(record, "on_start")),
    }
}

/// STARTED → SUCCESS with `result`.
pub fn succeed(
    record: &mut TaskRecord,
    result: &Value,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    match record.status {
        TaskStatus::Started => {
            record.status = TaskStatus::Success;
            record.finished_at = Some(finish_time(record, now));
            record.result_snapshot = Some(result.clone());
            record.error_detail = None;
            Ok(Transition::Applied)
        }
        TaskStatus::Success if record.result_snapshot.as_ref() == Some(result) => {
            Ok(Transition::Unchanged)
        }
        TaskStatus::Success => Err(LedgerError::InconsistentResult {
            task_id: record.task_id.clone(),
        }),
        _ => Err(invalid(record, "on_success")),
    }
}

/// STARTED → FAILURE with `error`.
pub fn fail(
    record: &mut TaskRecord,
    error: &ErrorDetail,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    match record.status {
        TaskStatus::Started => {
            record.status = TaskStatus::Failure;
            record.finished_at = Some(finish_time(record, now));
            record.error_detail = Some(error.clone());
            record.result_snapshot = None;
            Ok(Transition::Applied)
        }
        TaskStatus::Failure if record.error_detail.as_ref() == Some(error) => {
            Ok(Transition::Unchanged)
        }
        TaskStatus::Failure => Err(LedgerError::InconsistentResult {
            task_id: record.task_id.clone(),
        }),
        _ => Err(invalid(record, "on_failure")),
    }
}

/// STARTED → RETRY, logging `reason`.
///
/// The history keeps at most `history_cap` entries, newest last. A repeat of
/// the latest reason while already in RETRY is treated as a redelivery.
pub fn retry(
    record: &mut TaskRecord,
    reason: &str,
    history_cap: usize,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    match record.status {
        TaskStatus::Started => {
            record.status = TaskStatus::Retry;
            record.retry_count += 1;
            record.retry_history.push(RetryEntry {
                reason: reason.to_string(),
                at: now,
            });
            let overflow = record.retry_history.len().saturating_sub(history_cap);
            record.retry_history.drain(..overflow);
            Ok(Transition::Applied)
        }
        TaskStatus::Retry
            if record
                .retry_history
                .last()
                .is_some_and(|entry| entry.reason == reason) =>
        {
            Ok(Transition::Unchanged)
        }
        _ => Err(invalid(record, "on_retry")),
    }
}

/// Any non-terminal status → REVOKED.
pub fn revoke(record: &mut TaskRecord, now: DateTime<Utc>) -> LedgerResult<Transition> {
    match record.status {
        TaskStatus::Revoked => Ok(Transition::Unchanged),
        status if status.is_terminal() => Err(invalid(record, "on_revoke")),
        _ => {
            record.status = TaskStatus::Revoked;
            if record.finished_at.is_none() {
                record.finished_at = Some(finish_time(record, now));
            }
            Ok(Transition::Applied)
        }
    }
}

/// Record a progress value; status is untouched.
pub fn progress(
    record: &mut TaskRecord,
    current: i64,
    total: i64,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    if record.status.is_terminal() {
        return Err(invalid(record, "on_progress"));
    }

    let unchanged = record
        .progress
        .as_ref()
        .is_some_and(|p| p.current == current && p.total == total);
    if unchanged {
        return Ok(Transition::Unchanged);
    }

    record.progress = Some(ProgressSnapshot {
        current,
        total,
        updated_at: now,
    });
    Ok(Transition::Applied)
}

//! # taskledger
//!
//! Lifecycle and fan-in bookkeeping for tasks executed by an external task
//! queue.
//!
//! The queue's dispatcher calls into a [`TaskLedger`] at each point of a
//! task's life (submitted, started, succeeded, failed, retried, revoked) and
//! the ledger keeps a durable, versioned record per task. Fan-out groups get
//! an aggregate record that collapses the children's results with a named
//! reducer once the last child finishes.
//!
//! ## Features
//!
//! - **Strict state machine**: invalid transitions are rejected and leave
//!   the record untouched
//! - **At-least-once friendly**: repeated callbacks with the same payload are
//!   no-ops, conflicting ones are surfaced
//! - **Deterministic aggregation**: reducers see results in submission order,
//!   whatever order children finish in
//! - **Pluggable storage**: in-memory, or Redis with the `redis-store` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use taskledger::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> LedgerResult<()> {
//!     let ledger = TaskLedger::new(LedgerConfig::default()).await?;
//!
//!     ledger
//!         .on_group_submit("g1", vec!["c1".into(), "c2".into()], "sum")
//!         .await?;
//!
//!     ledger.on_child_terminal("g1", "c2", ChildOutcome::Success(json!(5))).await?;
//!     let report = ledger
//!         .on_child_terminal("g1", "c1", ChildOutcome::Success(json!(3)))
//!         .await?;
//!
//!     assert_eq!(report.status, AggregateStatus::Success);
//!     assert_eq!(report.aggregated_result, Some(json!(8)));
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod group;
pub mod logging;
pub mod store;
pub mod task;

pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::*;
    pub use crate::core::{
        FnReducer, LedgerOverview, Reducer, ReducerRegistry, RetentionSweeper, TaskLedger,
        Transition,
    };
    pub use crate::error::{LedgerError, LedgerResult};
    pub use crate::group::{AggregateRecord, AggregateStatus, ChildOutcome, GroupId, GroupReport};
    pub use crate::store::{InMemoryStore, PurgeStats, RecordStore, StoreFactory, StoreStats};
    pub use crate::task::{
        ErrorDetail, ProgressReport, StatusReport, TaskId, TaskRecord, TaskStatus, generate_id,
    };
    pub use async_trait::async_trait;

    #[cfg(feature = "redis-store")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-store")))]
    pub use crate::store::RedisStore;
}

pub use crate::core::{TaskLedger, Transition};
pub use crate::error::{LedgerError, LedgerResult};
pub use crate::group::{AggregateStatus, ChildOutcome, GroupReport};
pub use crate::store::{RecordStore, StoreFactory};
pub use crate::task::{ErrorDetail, StatusReport, TaskRecord, TaskStatus};
pub use async_trait::async_trait;

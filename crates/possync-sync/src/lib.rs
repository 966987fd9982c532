//! possync Sync - customer and order synchronization
//!
//! Provides:
//! - The run state machine driving pagination, enrichment and batch writes
//! - Checkpoint handling for incremental runs
//! - Periodic polling of every sync type
//!
//! ## Modules
//!
//! - [`engine`] - [`SyncOrchestrator`](engine::SyncOrchestrator): one run end to end
//! - [`pipeline`] - Per-type fetch/transform/write steps (customers, orders)
//! - [`scheduler`] - [`SyncScheduler`](scheduler::SyncScheduler): interval polling

pub mod engine;
pub mod pipeline;
pub mod scheduler;

use chrono::{DateTime, Utc};
use possync_core::domain::{DomainError, RunId, SyncType};
use thiserror::Error;

/// Errors that prevent a run from being recorded at all
///
/// A run that starts and then fails is not an error here: it is returned as
/// an outcome with status `FAILED`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run of the same type holds the run lock
    #[error("{sync_type} sync already running as run {run_id} (started {started_at})")]
    AlreadyRunning {
        sync_type: SyncType,
        run_id: RunId,
        started_at: DateTime<Utc>,
    },

    /// The run log or checkpoint store could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// A domain-level error propagated from possync-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl SyncError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        SyncError::Storage(format!("{err:#}"))
    }
}

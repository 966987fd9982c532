//! Run log port (driven/secondary port)
//!
//! Append-only audit of sync runs. The log also enforces that at most one
//! run per sync type is RUNNING at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{RunId, SyncMode, SyncRun, SyncType};

/// Result of trying to open a new run
#[derive(Debug, Clone, PartialEq)]
pub enum RunStart {
    /// A RUNNING row was created
    Started {
        run: SyncRun,
        /// Stale RUNNING rows that were marked FAILED first
        abandoned: Vec<RunId>,
    },
    /// Another run of the same type is still active
    AlreadyRunning {
        run_id: RunId,
        started_at: DateTime<Utc>,
    },
}

/// Persistent log of sync runs
#[async_trait]
pub trait IRunLog: Send + Sync {
    /// Atomically checks for an active run and, if none, creates one
    ///
    /// RUNNING rows that started before `stale_before` are marked FAILED
    /// with reason `abandoned` instead of blocking the new run.
    async fn begin_run(
        &self,
        sync_type: SyncType,
        mode: SyncMode,
        checkpoint_used: Option<DateTime<Utc>>,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<RunStart>;

    /// Persists progress or the terminal state of a run
    ///
    /// Terminal rows are never overwritten.
    async fn save_run(&self, run: &SyncRun) -> anyhow::Result<()>;

    async fn get_run(&self, id: RunId) -> anyhow::Result<Option<SyncRun>>;

    /// Most recent runs first
    async fn recent_runs(
        &self,
        sync_type: Option<SyncType>,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncRun>>;

    /// The most recent COMPLETED run of a type
    async fn last_completed(&self, sync_type: SyncType) -> anyhow::Result<Option<SyncRun>>;

    /// Deletes terminal runs that started before `cutoff`
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}

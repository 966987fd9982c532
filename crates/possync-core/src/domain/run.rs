//! SyncRun domain entity
//!
//! A SyncRun is the audit record of one sync invocation: which type was
//! synced, from which checkpoint, how many records were seen, created,
//! updated and failed, and how the run ended.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{RunId, SyncMode, SyncType};

/// Record-level failures kept per run; later ones are only counted
pub const MAX_RECORDED_FAILURES: usize = 500;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The run is still in progress
    Running,
    /// The run reached the end of the remote data (or its page ceiling)
    Completed,
    /// The run was aborted by a fatal condition
    Failed,
}

impl RunStatus {
    /// Returns the stable string form used in storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Returns true once the run can no longer change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(DomainError::UnknownRunStatus(other.to_string())),
        }
    }
}

/// Why a run ended in [`RunStatus::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Shutdown was requested while the run was in progress
    Cancelled,
    /// A RUNNING row outlived the stale-run timeout
    Abandoned,
    /// Remote calls kept failing after all retries
    RemoteUnavailable,
    /// The remote rejected a request in a way retrying cannot fix
    RemoteRejected,
    /// Authentication failed even after re-acquiring a token
    AuthRejected,
    /// Local storage could not be written
    StorageUnavailable,
}

impl FailureKind {
    /// Returns the stable string form used in storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Cancelled => "cancelled",
            FailureKind::Abandoned => "abandoned",
            FailureKind::RemoteUnavailable => "remote_unavailable",
            FailureKind::RemoteRejected => "remote_rejected",
            FailureKind::AuthRejected => "auth_rejected",
            FailureKind::StorageUnavailable => "storage_unavailable",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancelled" => Ok(FailureKind::Cancelled),
            "abandoned" => Ok(FailureKind::Abandoned),
            "remote_unavailable" => Ok(FailureKind::RemoteUnavailable),
            "remote_rejected" => Ok(FailureKind::RemoteRejected),
            "auth_rejected" => Ok(FailureKind::AuthRejected),
            "storage_unavailable" => Ok(FailureKind::StorageUnavailable),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown failure kind: {other}"
            ))),
        }
    }
}

/// Pipeline stage at which a single record failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The remote payload could not be decoded
    Parse,
    /// The membership lookup failed; the record was still written
    Membership,
    /// The local store rejected the record
    Write,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Parse => "parse",
            FailureStage::Membership => "membership",
            FailureStage::Write => "write",
        })
    }
}

/// A record-level failure captured during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Natural key of the record (remote id or order code)
    pub key: String,
    pub stage: FailureStage,
    pub reason: String,
}

impl RecordFailure {
    pub fn new(key: impl Into<String>, stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.key, self.stage, self.reason)
    }
}

/// Audit record of one sync invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    id: RunId,
    sync_type: SyncType,
    mode: SyncMode,
    status: RunStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    /// Checkpoint the run filtered on (None for full scans)
    checkpoint_used: Option<DateTime<Utc>>,
    /// Checkpoint in effect after the run completed
    checkpoint_produced: Option<DateTime<Utc>>,
    pages_fetched: u32,
    records_seen: u64,
    created: u64,
    updated: u64,
    failed: u64,
    failure_kind: Option<FailureKind>,
    error_message: Option<String>,
    failures: Vec<RecordFailure>,
}

impl SyncRun {
    /// Creates a RUNNING run with zero counters
    pub fn start(
        id: RunId,
        sync_type: SyncType,
        mode: SyncMode,
        checkpoint_used: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sync_type,
            mode,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            checkpoint_used,
            checkpoint_produced: None,
            pages_fetched: 0,
            records_seen: 0,
            created: 0,
            updated: 0,
            failed: 0,
            failure_kind: None,
            error_message: None,
            failures: Vec::new(),
        }
    }

    /// Rebuilds a run from persisted columns
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: RunId,
        sync_type: SyncType,
        mode: SyncMode,
        status: RunStatus,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        checkpoint_used: Option<DateTime<Utc>>,
        checkpoint_produced: Option<DateTime<Utc>>,
        pages_fetched: u32,
        counts: RunCounts,
        failure_kind: Option<FailureKind>,
        error_message: Option<String>,
        failures: Vec<RecordFailure>,
    ) -> Self {
        Self {
            id,
            sync_type,
            mode,
            status,
            started_at,
            completed_at,
            checkpoint_used,
            checkpoint_produced,
            pages_fetched,
            records_seen: counts.seen,
            created: counts.created,
            updated: counts.updated,
            failed: counts.failed,
            failure_kind,
            error_message,
            failures,
        }
    }

    // ------------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------------

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn checkpoint_used(&self) -> Option<DateTime<Utc>> {
        self.checkpoint_used
    }

    pub fn checkpoint_produced(&self) -> Option<DateTime<Utc>> {
        self.checkpoint_produced
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            seen: self.records_seen,
            created: self.created,
            updated: self.updated,
            failed: self.failed,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn failures(&self) -> &[RecordFailure] {
        &self.failures
    }

    /// Wall-clock duration, up to now for running runs
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    // ------------------------------------------------------------------------
    // Progress (only valid while RUNNING)
    // ------------------------------------------------------------------------

    fn ensure_running(&self, to: &str) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Records a fetched page and the number of items it carried
    pub fn record_page(&mut self, items: usize) -> Result<(), DomainError> {
        self.ensure_running("RUNNING")?;
        self.pages_fetched += 1;
        self.records_seen += items as u64;
        Ok(())
    }

    /// Adds the outcome of one written batch
    pub fn record_batch(&mut self, created: u64, updated: u64) -> Result<(), DomainError> {
        self.ensure_running("RUNNING")?;
        self.created += created;
        self.updated += updated;
        Ok(())
    }

    /// Records a record-level failure; the run keeps going
    pub fn record_failure(&mut self, failure: RecordFailure) -> Result<(), DomainError> {
        self.ensure_running("RUNNING")?;
        self.failed += 1;
        if self.failures.len() < MAX_RECORDED_FAILURES {
            self.failures.push(failure);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// RUNNING -> COMPLETED
    pub fn complete(
        &mut self,
        checkpoint_produced: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_running("COMPLETED")?;
        self.status = RunStatus::Completed;
        self.checkpoint_produced = checkpoint_produced;
        self.completed_at = Some(at);
        Ok(())
    }

    /// RUNNING -> FAILED
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_running("FAILED")?;
        self.status = RunStatus::Failed;
        self.failure_kind = Some(kind);
        self.error_message = Some(message.into());
        self.completed_at = Some(at);
        Ok(())
    }

    /// Human-readable error lines, fatal reason first, capped at `limit`
    pub fn error_summary(&self, limit: usize) -> Vec<String> {
        let fatal = self
            .error_message
            .iter()
            .map(|msg| match self.failure_kind {
                Some(kind) => format!("{kind}: {msg}"),
                None => msg.clone(),
            });
        fatal
            .chain(self.failures.iter().map(ToString::to_string))
            .take(limit)
            .collect()
    }
}

/// Record counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub seen: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

//! Sync orchestrator
//!
//! The [`SyncOrchestrator`] drives one run of a sync type from start to
//! finish against the four ports (remote API, record store, checkpoint
//! store, run log).
//!
//! ## Run Flow
//!
//! 1. **Start**: read the checkpoint, take the per-type run lock (stale
//!    RUNNING rows are marked abandoned), record a RUNNING run
//! 2. **Pages**: fetch page N, write its records in batches, persist
//!    progress, continue while the remote reports more pages or the page
//!    came back full
//! 3. **Finish**: on success advance the checkpoint past the latest
//!    `updated_at` written (see `Watermark`) and mark the run COMPLETED;
//!    on a fatal error leave the checkpoint alone and mark the run FAILED
//!
//! ## Failure Classes
//!
//! Record-level problems (undecodable item, membership lookup failure,
//! constraint violation) are recorded on the run and never stop it.
//! Page-level problems (retries exhausted, credentials rejected, storage
//! down, cancellation) end the run immediately. Records written before a
//! fatal error stay written: the checkpoint did not move, so the next run
//! re-fetches them and the upsert makes that harmless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use possync_core::config::SyncConfig;
use possync_core::domain::{
    DomainError, FailureKind, FailureStage, RecordFailure, RunCounts, RunId, RunStatus,
    SyncMode, SyncRecord, SyncRun, SyncType,
};
use possync_core::ports::{
    ICheckpointStore, ILoyaltyApi, IRecordStore, IRunLog, RemoteError, RunStart,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{CustomerPipeline, OrderPipeline, Pipeline};
use crate::SyncError;

// ============================================================================
// SyncSettings
// ============================================================================

/// Upper bound for the stale-run timeout (one year)
const MAX_STALE_RUN_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Tunables of the run loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Page size requested from the remote, already bounded by its maximum
    pub page_size: u32,
    /// Pages fetched at most per run; the next run resumes from the checkpoint
    pub max_pages_per_run: u32,
    /// Records per write transaction
    pub batch_size: usize,
    /// Concurrent membership lookups within one page
    pub membership_concurrency: usize,
    /// RUNNING rows older than this no longer block a new run
    pub stale_run_timeout: chrono::Duration,
    /// Error lines carried in a [`SyncOutcome`]
    pub error_summary_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SyncSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            page_size: config.effective_page_size(),
            max_pages_per_run: config.max_pages_per_run.max(1),
            batch_size: config.batch_size.max(1),
            membership_concurrency: config.membership_concurrency.max(1),
            stale_run_timeout: chrono::Duration::seconds(
                config.stale_run_timeout_secs.min(MAX_STALE_RUN_TIMEOUT_SECS) as i64,
            ),
            error_summary_limit: config.error_summary_limit,
        }
    }
}

// ============================================================================
// SyncOutcome
// ============================================================================

/// Summary of a finished run, successful or not
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub run_id: RunId,
    pub sync_type: SyncType,
    pub mode: SyncMode,
    pub status: RunStatus,
    pub pages_fetched: u32,
    pub counts: RunCounts,
    /// Checkpoint in effect when the run started
    pub checkpoint_before: Option<DateTime<Utc>>,
    /// Checkpoint in effect after the run
    pub checkpoint_after: Option<DateTime<Utc>>,
    pub failure_kind: Option<FailureKind>,
    /// Fatal reason first, then record-level failures
    pub errors: Vec<String>,
    /// Stale runs that were marked abandoned when this one started
    pub abandoned: Vec<RunId>,
    pub duration_ms: i64,
}

impl SyncOutcome {
    fn from_run(
        run: &SyncRun,
        checkpoint_before: Option<DateTime<Utc>>,
        checkpoint_after: Option<DateTime<Utc>>,
        abandoned: Vec<RunId>,
        error_limit: usize,
    ) -> Self {
        Self {
            run_id: run.id(),
            sync_type: run.sync_type(),
            mode: run.mode(),
            status: run.status(),
            pages_fetched: run.pages_fetched(),
            counts: run.counts(),
            checkpoint_before,
            checkpoint_after,
            failure_kind: run.failure_kind(),
            errors: run.error_summary(error_limit),
            abandoned,
            duration_ms: run.duration().num_milliseconds(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

// ============================================================================
// Fatal errors inside a run
// ============================================================================

/// Reason a run stops early
#[derive(Debug)]
struct Fatal {
    kind: FailureKind,
    message: String,
}

impl Fatal {
    fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "run cancelled before completion".to_string(),
        }
    }

    fn remote(err: RemoteError) -> Self {
        let kind = match &err {
            RemoteError::AuthRejected(_) => FailureKind::AuthRejected,
            RemoteError::RetriesExhausted { .. } => FailureKind::RemoteUnavailable,
            RemoteError::NotFound(_)
            | RemoteError::Rejected { .. }
            | RemoteError::InvalidResponse(_) => FailureKind::RemoteRejected,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }

    fn storage(err: anyhow::Error) -> Self {
        Self {
            kind: FailureKind::StorageUnavailable,
            message: format!("{err:#}"),
        }
    }
}

impl From<DomainError> for Fatal {
    fn from(err: DomainError) -> Self {
        Self {
            kind: FailureKind::StorageUnavailable,
            message: format!("run state: {err}"),
        }
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Runs customer and order synchronization against the configured ports
///
/// At most one run per sync type is active at a time, across processes:
/// the run log enforces it. The cancellation token is the kill signal; a
/// cancelled run stops before its next page and is recorded as FAILED.
pub struct SyncOrchestrator {
    api: Arc<dyn ILoyaltyApi>,
    records: Arc<dyn IRecordStore>,
    checkpoints: Arc<dyn ICheckpointStore>,
    runs: Arc<dyn IRunLog>,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn ILoyaltyApi>,
        records: Arc<dyn IRecordStore>,
        checkpoints: Arc<dyn ICheckpointStore>,
        runs: Arc<dyn IRunLog>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            api,
            records,
            checkpoints,
            runs,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` as the kill signal instead of a private one
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Runs one sync of `sync_type`
    ///
    /// Returns `Err` only when no run could be recorded: another run holds
    /// the lock, or the run log itself is unavailable. Runs that start and
    /// then fail come back as `Ok` with status `FAILED`.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, sync_type: SyncType, mode: SyncMode) -> Result<SyncOutcome, SyncError> {
        match sync_type {
            SyncType::Customers => {
                let pipeline = CustomerPipeline::new(
                    Arc::clone(&self.api),
                    Arc::clone(&self.records),
                    self.settings.membership_concurrency,
                );
                self.run_pipeline(sync_type, mode, &pipeline).await
            }
            SyncType::Orders => {
                let pipeline = OrderPipeline::new(Arc::clone(&self.api), Arc::clone(&self.records));
                self.run_pipeline(sync_type, mode, &pipeline).await
            }
        }
    }

    /// Runs customers and orders concurrently; each result is independent
    pub async fn run_all(&self, mode: SyncMode) -> Vec<(SyncType, Result<SyncOutcome, SyncError>)> {
        let (customers, orders) = tokio::join!(
            self.run(SyncType::Customers, mode),
            self.run(SyncType::Orders, mode)
        );
        vec![(SyncType::Customers, customers), (SyncType::Orders, orders)]
    }

    async fn run_pipeline<P: Pipeline>(
        &self,
        sync_type: SyncType,
        mode: SyncMode,
        pipeline: &P,
    ) -> Result<SyncOutcome, SyncError> {
        let checkpoint_before = self
            .checkpoints
            .get_checkpoint(sync_type)
            .await
            .map_err(SyncError::storage)?
            .map(|cp| cp.updated_since);
        let since = match mode {
            SyncMode::Incremental => checkpoint_before,
            SyncMode::Full => None,
        };

        let stale_before = Utc::now() - self.settings.stale_run_timeout;
        let (mut run, abandoned) = match self
            .runs
            .begin_run(sync_type, mode, since, stale_before)
            .await
            .map_err(SyncError::storage)?
        {
            RunStart::Started { run, abandoned } => (run, abandoned),
            RunStart::AlreadyRunning { run_id, started_at } => {
                warn!(run_id = %run_id, started_at = %started_at, "Sync already running");
                return Err(SyncError::AlreadyRunning {
                    sync_type,
                    run_id,
                    started_at,
                });
            }
        };

        for stale in &abandoned {
            warn!(run_id = %stale, "Marked stale run as abandoned");
        }
        info!(run_id = %run.id(), since = ?since, "Sync run started");

        let mut checkpoint_after = checkpoint_before;
        match self.drive(&mut run, pipeline, since).await {
            Ok(watermark) => {
                let advanced = match watermark.resume_point() {
                    Some(value) => self
                        .checkpoints
                        .advance_checkpoint(sync_type, value, run.id())
                        .await
                        .map(|cp| Some(cp.updated_since))
                        .map_err(Fatal::storage),
                    None => Ok(checkpoint_before),
                };
                match advanced {
                    Ok(value) => {
                        checkpoint_after = value;
                        run.complete(checkpoint_after, Utc::now())?;
                    }
                    Err(fatal) => {
                        error!(error = %fatal.message, "Failed to advance checkpoint");
                        run.fail(fatal.kind, fatal.message, Utc::now())?;
                    }
                }
            }
            Err(fatal) => {
                error!(kind = %fatal.kind, error = %fatal.message, "Sync run failed");
                run.fail(fatal.kind, fatal.message, Utc::now())?;
            }
        }

        self.runs.save_run(&run).await.map_err(SyncError::storage)?;

        let outcome = SyncOutcome::from_run(
            &run,
            checkpoint_before,
            checkpoint_after,
            abandoned,
            self.settings.error_summary_limit,
        );
        info!(
            run_id = %outcome.run_id,
            status = %outcome.status,
            pages = outcome.pages_fetched,
            seen = outcome.counts.seen,
            created = outcome.counts.created,
            updated = outcome.counts.updated,
            failed = outcome.counts.failed,
            duration_ms = outcome.duration_ms,
            "Sync run finished"
        );
        Ok(outcome)
    }

    /// The page loop; returns how far the next incremental run may skip
    async fn drive<P: Pipeline>(
        &self,
        run: &mut SyncRun,
        pipeline: &P,
        since: Option<DateTime<Utc>>,
    ) -> Result<Watermark, Fatal> {
        let page_size = self.settings.page_size;
        let mut watermark = Watermark::default();
        let mut page: u32 = 1;

        loop {
            if self.cancel.is_cancelled() {
                warn!(page, "Cancellation requested, stopping before next page");
                return Err(Fatal::cancelled());
            }
            if page > self.settings.max_pages_per_run {
                info!(
                    max_pages = self.settings.max_pages_per_run,
                    "Page ceiling reached, remaining pages left for the next run"
                );
                return Ok(watermark);
            }

            let fetched = pipeline
                .fetch(page, page_size, since)
                .await
                .map_err(Fatal::remote)?;
            let raw_len = fetched.raw_len;
            let has_next = fetched.has_next;
            debug!(page, raw_len, has_next, records = fetched.records.len(), "Fetched page");

            run.record_page(raw_len)?;
            for failure in fetched.failures {
                warn!(page, failure = %failure, "Record-level failure");
                run.record_failure(failure)?;
            }

            for batch in fetched.records.chunks(self.settings.batch_size) {
                let result = pipeline.write(batch).await.map_err(Fatal::storage)?;
                run.record_batch(result.created, result.updated)?;

                if !result.failures.is_empty() && !watermark.frozen {
                    warn!(page, "Batch partly rejected, checkpoint held before it");
                    watermark.frozen = true;
                }
                for failure in result.failures {
                    let key = failure.record.key();
                    warn!(page, key = %key, reason = %failure.reason, "Record not written");
                    run.record_failure(RecordFailure::new(key, FailureStage::Write, failure.reason))?;
                }

                if !watermark.frozen {
                    watermark.observe(batch.iter().filter_map(SyncRecord::remote_updated_at));
                }
            }

            self.runs.save_run(run).await.map_err(Fatal::storage)?;

            let page_full = raw_len >= page_size as usize;
            if raw_len == 0 || !(has_next || page_full) {
                watermark.drained = true;
                return Ok(watermark);
            }
            page += 1;
        }
    }
}

// ============================================================================
// Watermark
// ============================================================================

/// Checkpoint candidate accumulated over one run
///
/// Records arrive in ascending `updated_at` order, so once a batch has a
/// rejected record nothing after it may raise the checkpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Watermark {
    /// Latest `updated_at` of fully written batches
    latest: Option<DateTime<Utc>>,
    /// A batch had write failures; later batches are not tracked
    frozen: bool,
    /// The remote reported no further pages
    drained: bool,
}

impl Watermark {
    fn observe(&mut self, stamps: impl Iterator<Item = DateTime<Utc>>) {
        self.latest = stamps.fold(self.latest, |acc, ts| Some(acc.map_or(ts, |a| a.max(ts))));
    }

    /// Value to store as the checkpoint, used as an inclusive `updated_at_from`
    ///
    /// One microsecond past `latest` when every record up to it was written
    /// and the listing ended, so an idle re-run fetches nothing. Otherwise
    /// `latest` itself: records sharing that timestamp may still be pending.
    fn resume_point(&self) -> Option<DateTime<Utc>> {
        let latest = self.latest?;
        if self.drained && !self.frozen {
            Some(latest + chrono::Duration::microseconds(1))
        } else {
            Some(latest)
        }
    }
}

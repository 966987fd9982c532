//! Sync scheduler - periodic polling of every sync type
//!
//! The [`SyncScheduler`] owns one loop per sync type. Each loop waits for
//! its interval tick (or an explicit "sync now" request), runs one sync
//! through a [`SyncRunner`], logs the outcome and waits again.
//!
//! ## Flow
//!
//! ```text
//! interval tick ──┐
//!                 ├──→ SyncRunner::run(type, mode) ──→ outcome logged
//! request_sync ───┘
//!        (one loop per sync type, all stopped by the shutdown token)
//! ```
//!
//! Loops of different types run concurrently; a loop never overlaps with
//! itself, and a run already held by another process is skipped with a
//! warning until the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use possync_core::domain::{SyncMode, SyncType};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{SyncOrchestrator, SyncOutcome};
use crate::SyncError;

/// Something that can execute one sync run
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, sync_type: SyncType, mode: SyncMode) -> Result<SyncOutcome, SyncError>;
}

#[async_trait]
impl SyncRunner for SyncOrchestrator {
    async fn run(&self, sync_type: SyncType, mode: SyncMode) -> Result<SyncOutcome, SyncError> {
        SyncOrchestrator::run(self, sync_type, mode).await
    }
}

/// Runs every configured sync type on a fixed interval until shutdown
pub struct SyncScheduler {
    runner: Arc<dyn SyncRunner>,
    sync_types: Vec<SyncType>,
    mode: SyncMode,
    poll_interval: Duration,
    shutdown: CancellationToken,
    sync_now: Notify,
}

impl SyncScheduler {
    /// Creates a scheduler polling customers and orders incrementally
    pub fn new(
        runner: Arc<dyn SyncRunner>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        info!(poll_secs = poll_interval.as_secs(), "Creating sync scheduler");
        Self {
            runner,
            sync_types: SyncType::ALL.to_vec(),
            mode: SyncMode::Incremental,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            shutdown,
            sync_now: Notify::new(),
        }
    }

    pub fn with_sync_types(mut self, sync_types: Vec<SyncType>) -> Self {
        self.sync_types = sync_types;
        self
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn sync_types(&self) -> &[SyncType] {
        &self.sync_types
    }

    /// Wakes every idle loop for an immediate run
    ///
    /// Loops that are mid-run ignore the request; their next tick follows
    /// as usual.
    pub fn request_sync(&self) {
        info!("Immediate sync requested");
        self.sync_now.notify_waiters();
    }

    /// Runs until the shutdown token is cancelled
    ///
    /// The first tick fires immediately, so every type syncs once on start.
    pub async fn run(&self) {
        info!(types = ?self.sync_types, mode = %self.mode, "Sync scheduler starting");
        join_all(self.sync_types.iter().map(|&t| self.run_type(t))).await;
        info!("Sync scheduler stopped");
    }

    async fn run_type(&self, sync_type: SyncType) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(sync_type = %sync_type, "Interval tick");
                }
                _ = self.sync_now.notified() => {
                    debug!(sync_type = %sync_type, "Woken for immediate sync");
                }
            }
            self.run_once(sync_type).await;
        }
    }

    /// Runs one sync of `sync_type` and logs how it went
    ///
    /// Returns `None` when no run was recorded.
    pub async fn run_once(&self, sync_type: SyncType) -> Option<SyncOutcome> {
        match self.runner.run(sync_type, self.mode).await {
            Ok(outcome) if outcome.is_success() => {
                info!(
                    sync_type = %sync_type,
                    run_id = %outcome.run_id,
                    seen = outcome.counts.seen,
                    failed = outcome.counts.failed,
                    "Scheduled sync completed"
                );
                Some(outcome)
            }
            Ok(outcome) => {
                warn!(
                    sync_type = %sync_type,
                    run_id = %outcome.run_id,
                    kind = ?outcome.failure_kind,
                    errors = ?outcome.errors,
                    "Scheduled sync failed"
                );
                Some(outcome)
            }
            Err(SyncError::AlreadyRunning { run_id, .. }) => {
                warn!(sync_type = %sync_type, run_id = %run_id, "Skipping tick, sync already running");
                None
            }
            Err(e) => {
                error!(sync_type = %sync_type, error = %e, "Scheduled sync could not start");
                None
            }
        }
    }
}

//! Sync command - Pull customers and orders from the loyalty platform
//!
//! Provides the `possync sync` CLI command which:
//! 1. Loads configuration and opens the database
//! 2. Builds the token manager, HTTP client and orchestrator
//! 3. Runs the selected sync types (both by default, concurrently)
//! 4. Displays one summary per run; Ctrl-C stops after the current page

use anyhow::{bail, Result};
use clap::Args;
use possync_core::domain::{SyncMode, SyncType};
use possync_sync::engine::{SyncOutcome, SyncSettings};
use possync_sync::SyncError;
use tracing::{info, warn};

use crate::context::CliContext;
use crate::output::{format_duration_ms, format_time, plural, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Sync customers only
    #[arg(long, conflicts_with = "orders")]
    pub customers: bool,

    /// Sync orders only
    #[arg(long)]
    pub orders: bool,

    /// Ignore the checkpoint and rescan everything
    #[arg(long)]
    pub full: bool,

    /// Override sync.max_pages_per_run for this invocation
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,
}

impl SyncCommand {
    pub fn selected_types(&self) -> Vec<SyncType> {
        match (self.customers, self.orders) {
            (true, false) => vec![SyncType::Customers],
            (false, true) => vec![SyncType::Orders],
            _ => SyncType::ALL.to_vec(),
        }
    }

    fn mode(&self) -> SyncMode {
        if self.full {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        }
    }

    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();

        let mut settings = SyncSettings::from_config(&ctx.config.sync);
        if let Some(max_pages) = self.max_pages {
            settings.max_pages_per_run = max_pages;
        }
        let orchestrator = ctx.orchestrator(settings).await?;

        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current page");
                cancel.cancel();
            }
        });

        let mode = self.mode();
        let types = self.selected_types();
        info!(types = ?types, mode = %mode, "Starting manual sync");
        formatter.info(&format!("Starting {mode} sync..."));

        let results = if types.len() == 1 {
            vec![(types[0], orchestrator.run(types[0], mode).await)]
        } else {
            orchestrator.run_all(mode).await
        };

        let mut failed = 0usize;
        let mut json_results = Vec::with_capacity(results.len());
        for (sync_type, result) in results {
            match result {
                Ok(outcome) => {
                    if !outcome.is_success() {
                        failed += 1;
                    }
                    if ctx.format.is_json() {
                        json_results.push(serde_json::to_value(&outcome)?);
                    } else {
                        print_outcome(&*formatter, &outcome);
                    }
                }
                Err(e) => {
                    failed += 1;
                    if ctx.format.is_json() {
                        json_results.push(error_json(sync_type, &e));
                    } else {
                        formatter.error(&format!("{sync_type}: {e}"));
                    }
                }
            }
        }

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::Value::Array(json_results));
        }

        if failed > 0 {
            bail!("{failed} sync run(s) did not complete");
        }
        Ok(())
    }
}

fn error_json(sync_type: SyncType, err: &SyncError) -> serde_json::Value {
    match err {
        SyncError::AlreadyRunning {
            run_id, started_at, ..
        } => serde_json::json!({
            "sync_type": sync_type,
            "status": "ALREADY_RUNNING",
            "running_run_id": run_id,
            "started_at": started_at,
        }),
        other => serde_json::json!({
            "sync_type": sync_type,
            "status": "NOT_STARTED",
            "error": other.to_string(),
        }),
    }
}

fn print_outcome(formatter: &dyn OutputFormatter, outcome: &SyncOutcome) {
    let counts = outcome.counts;
    let headline = format!(
        "{} sync {} {} in {}",
        outcome.sync_type,
        outcome.run_id,
        outcome.status,
        format_duration_ms(outcome.duration_ms)
    );
    if outcome.is_success() {
        formatter.success(&headline);
    } else {
        formatter.error(&headline);
    }

    formatter.info(&format!(
        "Fetched:    {} ({})",
        plural(counts.seen, "record"),
        plural(u64::from(outcome.pages_fetched), "page")
    ));
    formatter.info(&format!("Created:    {}", counts.created));
    formatter.info(&format!("Updated:    {}", counts.updated));
    if counts.failed > 0 {
        formatter.warn(&format!("{} failed", plural(counts.failed, "record")));
    }
    formatter.info(&format!(
        "Checkpoint: {} -> {}",
        format_time(outcome.checkpoint_before),
        format_time(outcome.checkpoint_after)
    ));
    for stale in &outcome.abandoned {
        formatter.warn(&format!("Marked stale run {stale} as abandoned"));
    }
    for line in &outcome.errors {
        formatter.info(&format!("  - {line}"));
    }
}

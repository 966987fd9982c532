//! Status command - Display synchronization status
//!
//! Provides the `possync status` CLI command which shows:
//! 1. The checkpoint and last completed run of each sync type
//! 2. Local record counts
//! 3. The most recent runs from the run log

use anyhow::{Context, Result};
use clap::Args;
use possync_core::domain::{SyncRun, SyncType};
use possync_core::ports::{ICheckpointStore, IRecordStore, IRunLog};
use tracing::info;

use crate::context::CliContext;
use crate::output::{format_duration_ms, format_time, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Only show this sync type (customers or orders)
    #[arg(long = "type", value_name = "TYPE")]
    pub sync_type: Option<SyncType>,

    /// Number of recent runs to list
    #[arg(long, default_value_t = 10)]
    pub limit: u32,
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();

        let Some(store) = ctx.open_existing_store().await? else {
            formatter.error(&format!(
                "No database at {}. Run 'possync sync' first.",
                ctx.db_path().display()
            ));
            return Ok(());
        };
        info!(db = %ctx.db_path().display(), "Showing sync status");

        let types: Vec<SyncType> = match self.sync_type {
            Some(t) => vec![t],
            None => SyncType::ALL.to_vec(),
        };

        let mut per_type = Vec::with_capacity(types.len());
        for sync_type in &types {
            let checkpoint = store
                .get_checkpoint(*sync_type)
                .await
                .context("Failed to read checkpoint")?;
            let last_completed = store
                .last_completed(*sync_type)
                .await
                .context("Failed to read run log")?;
            let records = match sync_type {
                SyncType::Customers => store.count_customers().await,
                SyncType::Orders => store.count_orders().await,
            }
            .context("Failed to count records")?;
            per_type.push((*sync_type, checkpoint, last_completed, records));
        }

        let runs = store
            .recent_runs(self.sync_type, self.limit)
            .await
            .context("Failed to read run log")?;

        if ctx.format.is_json() {
            let types_json: Vec<_> = per_type
                .iter()
                .map(|(sync_type, checkpoint, last, records)| {
                    serde_json::json!({
                        "sync_type": sync_type,
                        "checkpoint": checkpoint,
                        "last_completed_run": last.as_ref().map(SyncRun::id),
                        "last_completed_at": last.as_ref().and_then(SyncRun::completed_at),
                        "local_records": records,
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "database": ctx.db_path(),
                "types": types_json,
                "recent_runs": runs,
            }));
            return Ok(());
        }

        formatter.success(&format!("possync status ({})", ctx.db_path().display()));
        for (sync_type, checkpoint, last, records) in &per_type {
            formatter.info("");
            formatter.info(&format!("{sync_type}:"));
            formatter.info(&format!("  Local records:  {records}"));
            formatter.info(&format!(
                "  Checkpoint:     {}",
                format_time(checkpoint.as_ref().map(|c| c.updated_since))
            ));
            formatter.info(&format!(
                "  Last completed: {}",
                format_time(last.as_ref().and_then(SyncRun::completed_at))
            ));
        }

        formatter.info("");
        if runs.is_empty() {
            formatter.info("No runs recorded yet");
            return Ok(());
        }
        formatter.info("Recent runs:");
        for run in &runs {
            print_run(&*formatter, run);
        }
        Ok(())
    }
}

fn print_run(formatter: &dyn OutputFormatter, run: &SyncRun) {
    let counts = run.counts();
    formatter.info(&format!(
        "  {:<6} {:<9} {:<11} {:<9} {}  seen={} created={} updated={} failed={} ({})",
        run.id().to_string(),
        run.sync_type().to_string(),
        run.mode().to_string(),
        run.status().to_string(),
        format_time(Some(run.started_at())),
        counts.seen,
        counts.created,
        counts.updated,
        counts.failed,
        format_duration_ms(run.duration().num_milliseconds()),
    ));
    if let Some(message) = run.error_message() {
        let kind = run
            .failure_kind()
            .map(|k| k.to_string())
            .unwrap_or_default();
        formatter.info(&format!("         {kind}: {message}"));
    }
}

//! SQLite implementation of IRunLog and ICheckpointStore
//!
//! `begin_run` takes the database write lock (`BEGIN IMMEDIATE`) before
//! checking for an active run, so two processes sharing the database file
//! cannot both start the same sync type. A partial unique index on
//! `sync_runs(sync_type) WHERE status = 'RUNNING'` backs the same rule.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;

use possync_core::domain::{
    format_timestamp, FailureKind, RecordFailure, RunCounts, RunId, RunStatus, SyncCheckpoint,
    SyncMode, SyncRun, SyncType,
};
use possync_core::ports::{ICheckpointStore, IRunLog, RunStart};

use crate::repository::{parse_datetime, parse_optional_datetime, SqliteSyncStore};
use crate::StoreError;

// ============================================================================
// Row mapping functions
// ============================================================================

fn serialization_error(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::SerializationError(format!("Invalid {what}: {e}"))
}

fn run_from_row(row: &SqliteRow) -> Result<SyncRun, StoreError> {
    let sync_type: String = row.try_get("sync_type")?;
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let failure_kind: Option<String> = row.try_get("failure_kind")?;
    let failures_json: String = row.try_get("failures")?;

    let failures: Vec<RecordFailure> = serde_json::from_str(&failures_json)
        .map_err(|e| serialization_error("failures JSON", e))?;
    let failure_kind = failure_kind
        .map(|k| k.parse::<FailureKind>())
        .transpose()
        .map_err(|e| serialization_error("failure kind", e))?;

    let counts = RunCounts {
        seen: row.try_get::<i64, _>("records_seen")? as u64,
        created: row.try_get::<i64, _>("created_count")? as u64,
        updated: row.try_get::<i64, _>("updated_count")? as u64,
        failed: row.try_get::<i64, _>("failed_count")? as u64,
    };

    Ok(SyncRun::restore(
        RunId::new(row.try_get("id")?),
        sync_type
            .parse::<SyncType>()
            .map_err(|e| serialization_error("sync type", e))?,
        mode.parse::<SyncMode>()
            .map_err(|e| serialization_error("mode", e))?,
        status
            .parse::<RunStatus>()
            .map_err(|e| serialization_error("status", e))?,
        parse_datetime(&row.try_get::<String, _>("started_at")?)?,
        parse_optional_datetime(row.try_get("completed_at")?)?,
        parse_optional_datetime(row.try_get("checkpoint_used")?)?,
        parse_optional_datetime(row.try_get("checkpoint_produced")?)?,
        row.try_get::<i64, _>("pages_fetched")? as u32,
        counts,
        failure_kind,
        row.try_get("error_message")?,
        failures,
    ))
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<SyncCheckpoint, StoreError> {
    let sync_type: String = row.try_get("sync_type")?;
    let run_id: Option<i64> = row.try_get("run_id")?;

    Ok(SyncCheckpoint {
        sync_type: sync_type
            .parse::<SyncType>()
            .map_err(|e| serialization_error("sync type", e))?,
        updated_since: parse_datetime(&row.try_get::<String, _>("updated_since")?)?,
        run_id: run_id.map(RunId::new),
        recorded_at: parse_datetime(&row.try_get::<String, _>("recorded_at")?)?,
    })
}

// ============================================================================
// begin_run helpers
// ============================================================================

/// A pooled connection inside a manual `BEGIN IMMEDIATE`
///
/// Every exit path ends the transaction before the connection goes back to
/// the pool: a failed `COMMIT` is rolled back, and a guard dropped mid-flight
/// (the caller's future was cancelled) rolls back on a spawned task.
struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTx {
    async fn begin(pool: &SqlitePool) -> Result<Self, StoreError> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::QueryFailed("transaction already finished".into()))
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            rollback_or_discard(conn).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn rollback(mut self) {
        if let Some(conn) = self.conn.take() {
            rollback_or_discard(conn).await;
        }
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("begin_run interrupted, rolling back");
                handle.spawn(rollback_or_discard(conn));
            }
            // No runtime to roll back on; closing the connection ends the transaction
            Err(_) => drop(conn.detach()),
        }
    }
}

/// Rolls back, or closes the connection when even that fails
async fn rollback_or_discard(mut conn: PoolConnection<Sqlite>) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::error!(error = %e, "Rollback failed, discarding connection");
        drop(conn.detach());
    }
}

async fn begin_run_locked(
    conn: &mut SqliteConnection,
    sync_type: SyncType,
    mode: SyncMode,
    checkpoint_used: Option<DateTime<Utc>>,
    stale_before: DateTime<Utc>,
) -> Result<RunStart, StoreError> {
    let now = Utc::now().trunc_subsecs(6);

    let stale: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM sync_runs \
         WHERE sync_type = ? AND status = 'RUNNING' AND started_at < ? ORDER BY id",
    )
    .bind(sync_type.as_str())
    .bind(format_timestamp(&stale_before))
    .fetch_all(&mut *conn)
    .await?;

    for id in &stale {
        sqlx::query(
            "UPDATE sync_runs SET status = 'FAILED', failure_kind = ?, error_message = ?, \
             completed_at = ? WHERE id = ?",
        )
        .bind(FailureKind::Abandoned.as_str())
        .bind(format!(
            "run still RUNNING after it started before {}",
            format_timestamp(&stale_before)
        ))
        .bind(format_timestamp(&now))
        .bind(*id)
        .execute(&mut *conn)
        .await?;
        tracing::warn!(run_id = id, %sync_type, "Marked stale run as abandoned");
    }

    let active: Option<(i64, String)> = sqlx::query_as(
        "SELECT id, started_at FROM sync_runs \
         WHERE sync_type = ? AND status = 'RUNNING' ORDER BY id DESC LIMIT 1",
    )
    .bind(sync_type.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((id, started_at)) = active {
        return Ok(RunStart::AlreadyRunning {
            run_id: RunId::new(id),
            started_at: parse_datetime(&started_at)?,
        });
    }

    let result = sqlx::query(
        "INSERT INTO sync_runs (sync_type, mode, status, started_at, checkpoint_used) \
         VALUES (?, ?, 'RUNNING', ?, ?)",
    )
    .bind(sync_type.as_str())
    .bind(mode.as_str())
    .bind(format_timestamp(&now))
    .bind(checkpoint_used.as_ref().map(format_timestamp))
    .execute(&mut *conn)
    .await?;

    let run = SyncRun::start(
        RunId::new(result.last_insert_rowid()),
        sync_type,
        mode,
        checkpoint_used,
        now,
    );

    Ok(RunStart::Started {
        run,
        abandoned: stale.into_iter().map(RunId::new).collect(),
    })
}

// ============================================================================
// IRunLog implementation
// ============================================================================

#[async_trait]
impl IRunLog for SqliteSyncStore {
    async fn begin_run(
        &self,
        sync_type: SyncType,
        mode: SyncMode,
        checkpoint_used: Option<DateTime<Utc>>,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<RunStart> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let attempt =
            begin_run_locked(tx.conn()?, sync_type, mode, checkpoint_used, stale_before).await;
        match attempt {
            Ok(start) => {
                tx.commit().await?;
                if let RunStart::Started { ref run, .. } = start {
                    tracing::debug!(run_id = %run.id(), %sync_type, %mode, "Run started");
                }
                Ok(start)
            }
            Err(e) => {
                tx.rollback().await;
                Err(e.into())
            }
        }
    }

    async fn save_run(&self, run: &SyncRun) -> anyhow::Result<()> {
        let counts = run.counts();
        let failures = serde_json::to_string(run.failures())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE sync_runs SET \
             status = ?, completed_at = ?, checkpoint_produced = ?, pages_fetched = ?, \
             records_seen = ?, created_count = ?, updated_count = ?, failed_count = ?, \
             failure_kind = ?, error_message = ?, failures = ? \
             WHERE id = ? AND status = 'RUNNING'",
        )
        .bind(run.status().as_str())
        .bind(run.completed_at().as_ref().map(format_timestamp))
        .bind(run.checkpoint_produced().as_ref().map(format_timestamp))
        .bind(i64::from(run.pages_fetched()))
        .bind(counts.seen as i64)
        .bind(counts.created as i64)
        .bind(counts.updated as i64)
        .bind(counts.failed as i64)
        .bind(run.failure_kind().map(|k| k.as_str()))
        .bind(run.error_message())
        .bind(&failures)
        .bind(run.id().get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunFinalized(run.id().get()).into());
        }

        tracing::trace!(run_id = %run.id(), status = %run.status(), "Saved run");
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> anyhow::Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(run_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn recent_runs(
        &self,
        sync_type: Option<SyncType>,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncRun>> {
        let rows = match sync_type {
            Some(ty) => {
                sqlx::query("SELECT * FROM sync_runs WHERE sync_type = ? ORDER BY id DESC LIMIT ?")
                    .bind(ty.as_str())
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM sync_runs ORDER BY id DESC LIMIT ?")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|r| run_from_row(r).map_err(anyhow::Error::from))
            .collect()
    }

    async fn last_completed(&self, sync_type: SyncType) -> anyhow::Result<Option<SyncRun>> {
        let row = sqlx::query(
            "SELECT * FROM sync_runs WHERE sync_type = ? AND status = 'COMPLETED' \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(sync_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(run_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result =
            sqlx::query("DELETE FROM sync_runs WHERE status != 'RUNNING' AND started_at < ?")
                .bind(format_timestamp(&cutoff))
                .execute(&self.pool)
                .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            tracing::info!(pruned, cutoff = %cutoff, "Pruned old sync runs");
        }
        Ok(pruned)
    }
}

// ============================================================================
// ICheckpointStore implementation
// ============================================================================

#[async_trait]
impl ICheckpointStore for SqliteSyncStore {
    async fn get_checkpoint(&self, sync_type: SyncType) -> anyhow::Result<Option<SyncCheckpoint>> {
        let row = sqlx::query("SELECT * FROM sync_checkpoints WHERE sync_type = ?")
            .bind(sync_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(checkpoint_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn advance_checkpoint(
        &self,
        sync_type: SyncType,
        value: DateTime<Utc>,
        run_id: RunId,
    ) -> anyhow::Result<SyncCheckpoint> {
        // Fixed-width timestamps compare correctly as text
        sqlx::query(
            "INSERT INTO sync_checkpoints (sync_type, updated_since, run_id, recorded_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(sync_type) DO UPDATE SET \
              updated_since = excluded.updated_since, \
              run_id = excluded.run_id, \
              recorded_at = excluded.recorded_at \
             WHERE excluded.updated_since > sync_checkpoints.updated_since",
        )
        .bind(sync_type.as_str())
        .bind(format_timestamp(&value))
        .bind(run_id.get())
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        let checkpoint = self
            .get_checkpoint(sync_type)
            .await?
            .ok_or_else(|| StoreError::QueryFailed(format!("checkpoint for {sync_type} vanished")))?;

        tracing::debug!(
            %sync_type,
            updated_since = %checkpoint.updated_since,
            "Checkpoint recorded"
        );
        Ok(checkpoint)
    }
}

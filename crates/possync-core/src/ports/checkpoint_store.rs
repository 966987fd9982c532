//! Checkpoint store port (driven/secondary port)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{RunId, SyncCheckpoint, SyncType};

/// Durable per-sync-type watermark
#[async_trait]
pub trait ICheckpointStore: Send + Sync {
    /// Returns the checkpoint, or None if the type never completed a run
    async fn get_checkpoint(&self, sync_type: SyncType) -> anyhow::Result<Option<SyncCheckpoint>>;

    /// Moves the checkpoint forward to `value`
    ///
    /// Never regresses: if the stored value is already later, it is kept.
    /// Returns the checkpoint in effect after the call.
    async fn advance_checkpoint(
        &self,
        sync_type: SyncType,
        value: DateTime<Utc>,
        run_id: RunId,
    ) -> anyhow::Result<SyncCheckpoint>;
}

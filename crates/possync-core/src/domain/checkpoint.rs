//! Per-sync-type checkpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{RunId, SyncType};

/// The persisted "updated since" watermark for one sync type
///
/// Only ever moves forward. Records whose remote `updated_at` equals the
/// watermark are fetched again by the next run; re-upserting them is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub sync_type: SyncType,
    pub updated_since: DateTime<Utc>,
    /// Run that last advanced the checkpoint
    pub run_id: Option<RunId>,
    pub recorded_at: DateTime<Utc>,
}

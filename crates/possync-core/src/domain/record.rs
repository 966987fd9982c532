//! Behaviour shared by every locally persisted record type

use chrono::{DateTime, Utc};

/// A record the sync pipeline writes to local storage
///
/// The pipeline only needs two things from a record: the natural key the
/// store upserts on, and the remote modification time that feeds the
/// checkpoint.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    /// Natural key, unique per record type
    fn key(&self) -> String;

    /// Remote `updated_at` used to advance the checkpoint
    fn remote_updated_at(&self) -> Option<DateTime<Utc>>;
}

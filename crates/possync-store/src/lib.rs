//! possync Store - Local persistence
//!
//! SQLite-based storage for:
//! - Customer and order records (batch upserts keyed by natural key)
//! - Per-sync-type checkpoints
//! - The sync run log
//!
//! ## Architecture
//!
//! This crate implements the `IRecordStore`, `ICheckpointStore` and `IRunLog`
//! ports from `possync-core` on a single SQLite database. It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteSyncStore`] - Implementation of all three storage ports
//! - [`StoreError`] - Error types for storage operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use possync_store::{DatabasePool, SqliteSyncStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/possync/possync.db")).await?;
//! let store = SqliteSyncStore::new(pool.pool().clone());
//! // Use store as IRecordStore, ICheckpointStore and IRunLog...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;
pub mod run_log;

pub use pool::DatabasePool;
pub use repository::SqliteSyncStore;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Attempt to overwrite a run that already reached a terminal status
    #[error("Run {0} is already finalized")]
    RunFinalized(i64),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

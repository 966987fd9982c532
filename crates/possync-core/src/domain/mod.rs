//! Domain entities and business logic
//!
//! This module contains the core domain types for possync:
//! - Newtypes for identifiers, sync types and timestamps
//! - Local customer and order records
//! - Sync run audit records and checkpoints
//! - Domain-specific error types

pub mod checkpoint;
pub mod customer;
pub mod errors;
pub mod newtypes;
pub mod order;
pub mod record;
pub mod run;

// Re-export commonly used types
pub use checkpoint::SyncCheckpoint;
pub use customer::{LocalCustomerRecord, StoredCustomer};
pub use errors::DomainError;
pub use newtypes::*;
pub use order::{LocalOrderRecord, OrderLine};
pub use record::SyncRecord;
pub use run::{FailureKind, FailureStage, RecordFailure, RunCounts, RunStatus, SyncRun};

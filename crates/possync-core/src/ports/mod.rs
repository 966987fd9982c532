//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync core depends
//! on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILoyaltyApi`] - Remote loyalty platform (customers, memberships, orders)
//! - [`IRecordStore`] - Batch upserts and lookups of local records
//! - [`ICheckpointStore`] - Per-sync-type incremental watermark
//! - [`IRunLog`] - Audit log of sync runs and the single-run guard

pub mod checkpoint_store;
pub mod loyalty_api;
pub mod record_store;
pub mod run_log;

pub use checkpoint_store::ICheckpointStore;
pub use loyalty_api::{
    ILoyaltyApi, MalformedRecord, Page, RemoteCustomer, RemoteError, RemoteLineItem,
    RemoteMembership, RemoteOrder, RemoteOrderCustomer,
};
pub use record_store::{BatchResult, IRecordStore, WriteFailure};
pub use run_log::{IRunLog, RunStart};

//! possync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `LocalCustomerRecord`, `LocalOrderRecord`, `SyncRun`, `SyncCheckpoint`
//! - **Record transformer** - pure mapping from remote payloads to local records
//! - **Port definitions** - Traits for adapters: `ILoyaltyApi`, `IRecordStore`,
//!   `ICheckpointStore`, `IRunLog`
//! - **Configuration** - YAML-backed settings shared by the binaries
//!
//! # Architecture
//!
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement
//! (`possync-api` for the remote loyalty platform, `possync-store` for SQLite).

pub mod config;
pub mod domain;
pub mod ports;
pub mod transform;

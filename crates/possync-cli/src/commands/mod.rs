//! CLI command implementations

pub mod config;
pub mod customer;
pub mod status;
pub mod sync;

//! Loyalty platform port (driven/secondary port)
//!
//! This module defines the interface for reading customers, memberships and
//! orders from the remote loyalty platform.
//!
//! ## Design Notes
//!
//! - Unlike the storage ports, this port returns a typed [`RemoteError`]: the
//!   orchestrator has to tell a missing membership (record-level) apart from
//!   exhausted retries or rejected credentials (run-level).
//! - The DTOs here are port-level, already decoded from the wire format;
//!   [`crate::transform`] maps them to local records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::RemoteCustomerId;

// ============================================================================
// Errors
// ============================================================================

/// Failure of a remote call after the adapter's own retry/refresh handling
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected, even after re-acquiring a token
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Transient failures persisted through every retry attempt
    #[error("{path} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        last_error: String,
    },

    /// The remote refused the request (non-retryable 4xx)
    #[error("request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// DTOs
// ============================================================================

/// A customer as returned by the remote platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCustomer {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub birthday_day: Option<u32>,
    pub birthday_month: Option<u32>,
    pub birthday_year: Option<i32>,
    pub tags: Option<String>,
    pub physical_card_code: Option<String>,
    pub points: Option<f64>,
    pub exp_points: Option<f64>,
    pub total_spending: Option<f64>,
    pub total_points: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Membership details for one customer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMembership {
    pub level_name: Option<String>,
    pub used_points: Option<f64>,
    pub total_points: Option<f64>,
}

/// Customer reference embedded in an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrderCustomer {
    pub id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// One line item of a remote order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteLineItem {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
}

/// An order as returned by the remote platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: i64,
    pub name: Option<String>,
    pub customer: Option<RemoteOrderCustomer>,
    pub location_id: Option<i64>,
    pub financial_status: Option<String>,
    pub subtotal_price: Option<f64>,
    pub total_discounts: Option<f64>,
    pub shipment_fee: Option<f64>,
    pub total_price: Option<f64>,
    pub note: Option<String>,
    pub line_items: Vec<RemoteLineItem>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An item of a page that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    /// Remote id if it could be read, otherwise the item position
    pub key: String,
    pub reason: String,
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub malformed: Vec<MalformedRecord>,
    /// Pagination hint from the remote; false when absent
    pub has_next: bool,
}

impl<T> Page<T> {
    /// Number of entries the remote returned, decodable or not
    pub fn raw_len(&self) -> usize {
        self.items.len() + self.malformed.len()
    }

    /// An empty final page
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            malformed: Vec::new(),
            has_next: false,
        }
    }
}

// ============================================================================
// Port trait
// ============================================================================

/// Read access to the loyalty platform
///
/// Pages are 1-indexed. `updated_since` is inclusive.
#[async_trait]
pub trait ILoyaltyApi: Send + Sync {
    /// Lists customers, oldest modification first
    async fn list_customers(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page<RemoteCustomer>, RemoteError>;

    /// Fetches membership details for a single customer
    async fn get_membership(&self, id: RemoteCustomerId) -> Result<RemoteMembership, RemoteError>;

    /// Lists orders, oldest modification first
    async fn list_orders(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page<RemoteOrder>, RemoteError>;
}

//! Locally persisted order records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemoteCustomerId;
use super::record::SyncRecord;

/// One line of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub name: String,
    pub quantity: f64,
    pub price: f64,
}

/// An order as stored locally, keyed by its order code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOrderRecord {
    /// Order code, e.g. `#1042`
    pub code: String,
    pub remote_id: i64,
    pub customer_remote_id: Option<RemoteCustomerId>,
    pub customer_phone: String,
    pub customer_name: String,
    pub location_id: Option<i64>,
    pub financial_status: String,
    pub subtotal: f64,
    pub discount: f64,
    pub shipment_fee: f64,
    pub total: f64,
    pub note: String,
    pub lines: Vec<OrderLine>,
    pub remote_created_at: Option<DateTime<Utc>>,
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl LocalOrderRecord {
    /// Total number of units across all lines
    #[must_use]
    pub fn total_quantity(&self) -> f64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

impl SyncRecord for LocalOrderRecord {
    fn key(&self) -> String {
        self.code.clone()
    }

    /// Orders that were never modified carry only a creation time
    fn remote_updated_at(&self) -> Option<DateTime<Utc>> {
        self.remote_updated_at.or(self.remote_created_at)
    }
}

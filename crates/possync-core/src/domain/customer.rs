//! Locally persisted customer records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RemoteCustomerId;
use super::record::SyncRecord;

/// A customer as stored locally, keyed by the remote identifier
///
/// Text fields that the remote platform omits are stored as empty strings.
/// Birth-date components are independent so that partial dates survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCustomerRecord {
    pub remote_id: RemoteCustomerId,
    pub last_name: String,
    pub first_name: String,
    pub phone: String,
    pub email: String,
    pub gender: String,
    pub birthday_day: Option<u32>,
    pub birthday_month: Option<u32>,
    pub birthday_year: Option<i32>,
    pub tags: String,
    pub physical_card_code: String,
    pub points: f64,
    pub exp_points: f64,
    pub total_spending: f64,
    pub total_points: f64,
    /// Membership tier label, empty when membership data is unavailable
    pub tier_label: String,
    pub used_points: f64,
    pub remote_created_at: Option<DateTime<Utc>>,
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl LocalCustomerRecord {
    /// Full display name, "first last" with blanks removed
    #[must_use]
    pub fn display_name(&self) -> String {
        [self.first_name.trim(), self.last_name.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns true when membership enrichment populated this record
    #[must_use]
    pub fn has_membership(&self) -> bool {
        !self.tier_label.is_empty()
    }
}

impl SyncRecord for LocalCustomerRecord {
    fn key(&self) -> String {
        self.remote_id.to_string()
    }

    fn remote_updated_at(&self) -> Option<DateTime<Utc>> {
        self.remote_updated_at
    }
}

/// A customer row read back from the store, with bookkeeping columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCustomer {
    /// Surrogate key assigned by the store
    pub id: i64,
    #[serde(flatten)]
    pub record: LocalCustomerRecord,
    pub first_synced_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

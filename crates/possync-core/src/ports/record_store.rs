//! Record store port (driven/secondary port)
//!
//! Batch upserts of local customer and order records, plus the lookups the
//! CLI exposes. Errors returned from the batch methods are fatal for the
//! batch (nothing was committed); per-record problems are reported inside
//! [`BatchResult`].

use async_trait::async_trait;

use crate::domain::{LocalCustomerRecord, LocalOrderRecord, RemoteCustomerId, StoredCustomer};

/// A record the store refused, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure<R> {
    pub record: R,
    pub reason: String,
}

/// Outcome of writing one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<R> {
    pub created: u64,
    pub updated: u64,
    pub failures: Vec<WriteFailure<R>>,
}

impl<R> Default for BatchResult<R> {
    fn default() -> Self {
        Self {
            created: 0,
            updated: 0,
            failures: Vec::new(),
        }
    }
}

impl<R> BatchResult<R> {
    /// Number of records that were persisted
    pub fn written(&self) -> u64 {
        self.created + self.updated
    }
}

/// Persistent storage for synced records
#[async_trait]
pub trait IRecordStore: Send + Sync {
    /// Upserts customers by remote id in a single transaction
    async fn upsert_customers(
        &self,
        batch: &[LocalCustomerRecord],
    ) -> anyhow::Result<BatchResult<LocalCustomerRecord>>;

    /// Upserts orders by order code in a single transaction
    async fn upsert_orders(
        &self,
        batch: &[LocalOrderRecord],
    ) -> anyhow::Result<BatchResult<LocalOrderRecord>>;

    async fn get_customer(&self, remote_id: RemoteCustomerId)
        -> anyhow::Result<Option<StoredCustomer>>;

    /// Customers whose stored phone equals `phone` exactly
    async fn find_customers_by_phone(&self, phone: &str) -> anyhow::Result<Vec<StoredCustomer>>;

    async fn get_order(&self, code: &str) -> anyhow::Result<Option<LocalOrderRecord>>;

    async fn count_customers(&self) -> anyhow::Result<u64>;

    async fn count_orders(&self) -> anyhow::Result<u64>;
}

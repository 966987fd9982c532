//! Per-type fetch and write steps
//!
//! A [`Pipeline`] turns one remote page into local records and writes
//! batches of them. The orchestrator drives pagination, batching and
//! bookkeeping identically for every type; only these two steps differ.
//!
//! - [`CustomerPipeline`]: customer page plus one membership lookup per
//!   customer, fetched concurrently up to a bound
//! - [`OrderPipeline`]: order page, no enrichment

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use possync_core::domain::{
    FailureStage, LocalCustomerRecord, LocalOrderRecord, RecordFailure, RemoteCustomerId,
    SyncRecord,
};
use possync_core::ports::{
    BatchResult, ILoyaltyApi, IRecordStore, MalformedRecord, RemoteCustomer, RemoteError,
    RemoteMembership,
};
use possync_core::transform::RecordTransformer;
use tracing::{debug, warn};

/// One remote page, already transformed
#[derive(Debug)]
pub struct FetchedPage<R> {
    /// Records ready to be written
    pub records: Vec<R>,
    /// Record-level problems found while decoding or enriching
    pub failures: Vec<RecordFailure>,
    /// Entries the remote returned, including undecodable ones
    pub raw_len: usize,
    pub has_next: bool,
}

/// Fetch and write steps for one sync type
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Record: SyncRecord;

    /// Fetches and transforms page `page`
    ///
    /// An error here is fatal for the run.
    async fn fetch(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedPage<Self::Record>, RemoteError>;

    /// Writes one batch; an error here is fatal for the run
    async fn write(&self, batch: &[Self::Record]) -> anyhow::Result<BatchResult<Self::Record>>;
}

fn parse_failure(malformed: MalformedRecord) -> RecordFailure {
    RecordFailure::new(malformed.key, FailureStage::Parse, malformed.reason)
}

// ============================================================================
// Customers
// ============================================================================

/// Customers enriched with their membership tier
pub struct CustomerPipeline {
    api: Arc<dyn ILoyaltyApi>,
    records: Arc<dyn IRecordStore>,
    transformer: RecordTransformer,
    membership_concurrency: usize,
}

impl CustomerPipeline {
    pub fn new(
        api: Arc<dyn ILoyaltyApi>,
        records: Arc<dyn IRecordStore>,
        membership_concurrency: usize,
    ) -> Self {
        Self {
            api,
            records,
            transformer: RecordTransformer,
            membership_concurrency: membership_concurrency.max(1),
        }
    }

    async fn lookup_membership(
        &self,
        customer: &RemoteCustomer,
    ) -> Option<Result<RemoteMembership, RemoteError>> {
        let id = RemoteCustomerId::new(customer.id).ok()?;
        Some(self.api.get_membership(id).await)
    }
}

#[async_trait]
impl Pipeline for CustomerPipeline {
    type Record = LocalCustomerRecord;

    async fn fetch(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedPage<LocalCustomerRecord>, RemoteError> {
        let remote = self
            .api
            .list_customers(page, page_size, updated_since)
            .await?;
        let raw_len = remote.raw_len();
        let mut failures: Vec<RecordFailure> =
            remote.malformed.into_iter().map(parse_failure).collect();

        // Every lookup of the page finishes before anything is written
        let enriched: Vec<_> = stream::iter(remote.items)
            .map(|customer| async move {
                let membership = self.lookup_membership(&customer).await;
                (customer, membership)
            })
            .buffered(self.membership_concurrency)
            .collect()
            .await;

        let mut records = Vec::with_capacity(enriched.len());
        for (customer, membership) in enriched {
            let membership = match membership {
                Some(Ok(m)) => Some(m),
                Some(Err(RemoteError::AuthRejected(msg))) => {
                    return Err(RemoteError::AuthRejected(msg));
                }
                Some(Err(err)) => {
                    debug!(remote_id = customer.id, error = %err, "Membership lookup failed");
                    failures.push(RecordFailure::new(
                        customer.id.to_string(),
                        FailureStage::Membership,
                        err.to_string(),
                    ));
                    None
                }
                None => None,
            };

            match self.transformer.transform_customer(&customer, membership.as_ref()) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(remote_id = customer.id, error = %err, "Customer rejected");
                    failures.push(RecordFailure::new(
                        customer.id.to_string(),
                        FailureStage::Parse,
                        err.to_string(),
                    ));
                }
            }
        }

        Ok(FetchedPage {
            records,
            failures,
            raw_len,
            has_next: remote.has_next,
        })
    }

    async fn write(
        &self,
        batch: &[LocalCustomerRecord],
    ) -> anyhow::Result<BatchResult<LocalCustomerRecord>> {
        self.records.upsert_customers(batch).await
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Orders, keyed by order code
pub struct OrderPipeline {
    api: Arc<dyn ILoyaltyApi>,
    records: Arc<dyn IRecordStore>,
    transformer: RecordTransformer,
}

impl OrderPipeline {
    pub fn new(api: Arc<dyn ILoyaltyApi>, records: Arc<dyn IRecordStore>) -> Self {
        Self {
            api,
            records,
            transformer: RecordTransformer,
        }
    }
}

#[async_trait]
impl Pipeline for OrderPipeline {
    type Record = LocalOrderRecord;

    async fn fetch(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<FetchedPage<LocalOrderRecord>, RemoteError> {
        let remote = self.api.list_orders(page, page_size, updated_since).await?;
        let raw_len = remote.raw_len();
        let mut failures: Vec<RecordFailure> =
            remote.malformed.into_iter().map(parse_failure).collect();

        let mut records = Vec::with_capacity(remote.items.len());
        for order in &remote.items {
            match self.transformer.transform_order(order) {
                Ok(record) => records.push(record),
                Err(err) => failures.push(RecordFailure::new(
                    order.id.to_string(),
                    FailureStage::Parse,
                    err.to_string(),
                )),
            }
        }

        Ok(FetchedPage {
            records,
            failures,
            raw_len,
            has_next: remote.has_next,
        })
    }

    async fn write(
        &self,
        batch: &[LocalOrderRecord],
    ) -> anyhow::Result<BatchResult<LocalOrderRecord>> {
        self.records.upsert_orders(batch).await
    }
}

//! LoyaltyApiProvider - ILoyaltyApi implementation over [`LoyaltyClient`]
//!
//! ## Design Notes
//!
//! - Retry, backoff and token refresh all happen inside the client; by the
//!   time an error reaches this adapter it is final, and is only translated
//!   into the port's [`RemoteError`].
//! - Page size is clamped here to the platform maximum so callers cannot
//!   request more than the API serves.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use possync_core::config::Config;
use possync_core::domain::RemoteCustomerId;
use possync_core::ports::{
    ILoyaltyApi, Page, RemoteCustomer, RemoteError, RemoteMembership, RemoteOrder,
};
use tracing::debug;

use crate::client::LoyaltyClient;
use crate::ApiError;

/// Adapter exposing [`LoyaltyClient`] through the [`ILoyaltyApi`] port
#[derive(Debug, Clone)]
pub struct LoyaltyApiProvider {
    client: Arc<LoyaltyClient>,
    max_page_size: u32,
}

impl LoyaltyApiProvider {
    pub fn new(client: LoyaltyClient, max_page_size: u32) -> Self {
        Self {
            client: Arc::new(client),
            max_page_size: max_page_size.max(1),
        }
    }

    /// Builds the client stack from configuration
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Ok(Self::new(
            LoyaltyClient::from_config(config)?,
            config.sync.max_page_size,
        ))
    }

    pub fn client(&self) -> &LoyaltyClient {
        &self.client
    }

    fn clamp(&self, page_size: u32) -> u32 {
        let clamped = page_size.clamp(1, self.max_page_size);
        if clamped != page_size {
            debug!(requested = page_size, used = clamped, "Clamped page size");
        }
        clamped
    }
}

#[async_trait]
impl ILoyaltyApi for LoyaltyApiProvider {
    async fn list_customers(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page<RemoteCustomer>, RemoteError> {
        self.client
            .list_customers(page.max(1), self.clamp(page_size), updated_since)
            .await
            .map_err(RemoteError::from)
    }

    async fn get_membership(&self, id: RemoteCustomerId) -> Result<RemoteMembership, RemoteError> {
        self.client
            .get_membership(id)
            .await
            .map_err(RemoteError::from)
    }

    async fn list_orders(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page<RemoteOrder>, RemoteError> {
        self.client
            .list_orders(page.max(1), self.clamp(page_size), updated_since)
            .await
            .map_err(RemoteError::from)
    }
}

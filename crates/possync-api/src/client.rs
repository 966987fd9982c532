//! Loyalty platform HTTP client
//!
//! Wraps `reqwest::Client` with the platform's `Authorization: TOKEN ...`
//! header, proactive rate limiting, and the retry policy every call goes
//! through:
//!
//! - HTTP 401: discard the cached token, acquire a new one, retry once. A
//!   second 401 is returned as [`ApiError::Unauthorized`].
//! - HTTP 429, 5xx, connection errors, token endpoint outages: retry with
//!   exponential backoff and jitter (or the server's `Retry-After`) until
//!   the attempt ceiling, then [`ApiError::RetriesExhausted`].
//! - HTTP 404: [`ApiError::NotFound`]. Other 4xx: [`ApiError::ClientError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use possync_api::client::LoyaltyClient;
//! use possync_core::config::Config;
//!
//! # async fn example() -> Result<(), possync_api::ApiError> {
//! let client = LoyaltyClient::from_config(&Config::default())?;
//! let page = client.list_customers(1, 100, None).await?;
//! println!("{} customers on page 1", page.items.len());
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use possync_core::config::{Config, RetryConfig};
use possync_core::domain::{format_timestamp, RemoteCustomerId};
use possync_core::ports::{Page, RemoteCustomer, RemoteMembership, RemoteOrder};
use rand::Rng;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, RETRY_AFTER},
    Client, StatusCode,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{AccessToken, TokenCredentials, TokenManager};
use crate::payload;
use crate::rate_limit::{parse_retry_after, AdaptiveRateLimiter, Endpoint};
use crate::ApiError;

/// Longest error body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 200;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Attempt ceiling and backoff curve for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Un-jittered delay after the `attempt`-th failure (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// [`backoff_delay`](Self::backoff_delay) scaled by a random factor in [0.5, 1.0]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        self.backoff_delay(attempt).mul_f64(factor)
    }
}

// ============================================================================
// LoyaltyClient
// ============================================================================

/// Authenticated client for the loyalty platform REST API
pub struct LoyaltyClient {
    http: Client,
    base_url: String,
    auth_scheme: String,
    tokens: Arc<TokenManager>,
    rate_limiter: Option<Arc<AdaptiveRateLimiter>>,
    retry: RetryPolicy,
}

impl LoyaltyClient {
    /// Creates a client with the default retry policy and no rate limiter
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<TokenManager>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_scheme: "TOKEN".to_string(),
            tokens,
            rate_limiter: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Builds the token manager, rate limiter and retry policy from `config`
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let timeout = Duration::from_secs(config.remote.request_timeout_secs.max(1));
        let credentials = TokenCredentials::from_config(&config.auth, timeout)?;
        let tokens = Arc::new(TokenManager::new(credentials)?);
        let limiter = Arc::new(AdaptiveRateLimiter::from_config(&config.rate_limiting));

        Ok(Self::new(&config.remote.base_url, tokens, timeout)?
            .with_auth_scheme(&config.remote.auth_scheme)
            .with_retry_policy(RetryPolicy::from_config(&config.retry))
            .with_rate_limiter(limiter))
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the scheme word placed before the token (`TOKEN` by default)
    pub fn with_auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorization(&self, token: &AccessToken) -> String {
        format!("{} {}", self.auth_scheme, token.secret())
    }

    // ========================================================================
    // Resource calls
    // ========================================================================

    /// `GET /customers.json`, oldest modification first
    pub async fn list_customers(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page<RemoteCustomer>, ApiError> {
        debug!(page, page_size, since = ?updated_since, "Listing customers");
        let body = self
            .get_json(
                Endpoint::Customers,
                "/customers.json",
                &list_query(page, page_size, updated_since),
            )
            .await?;
        payload::parse_customer_page(body)
    }

    /// `GET /customers/{id}/membership.json`
    pub async fn get_membership(&self, id: RemoteCustomerId) -> Result<RemoteMembership, ApiError> {
        let path = format!("/customers/{}/membership.json", id.get());
        let body = self.get_json(Endpoint::Membership, &path, &[]).await?;
        payload::parse_membership(body)?
            .ok_or_else(|| ApiError::NotFound(format!("no membership for customer {id}")))
    }

    /// `GET /orders.json`, oldest modification first
    pub async fn list_orders(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Page<RemoteOrder>, ApiError> {
        debug!(page, page_size, since = ?updated_since, "Listing orders");
        let body = self
            .get_json(
                Endpoint::Orders,
                "/orders.json",
                &list_query(page, page_size, updated_since),
            )
            .await?;
        payload::parse_order_page(body)
    }

    // ========================================================================
    // Request execution
    // ========================================================================

    /// Sends `GET path` under the retry policy and decodes the JSON body
    pub async fn get_json(
        &self,
        endpoint: Endpoint,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 1;
        let mut reauthenticated = false;

        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire(endpoint).await;
            }

            let fallback_delay = self.retry.jittered_delay(attempt);
            let (err, token) = match self.tokens.token().await {
                Ok(token) => match self.send_once(path, query, &token, fallback_delay).await {
                    Ok(body) => {
                        if let Some(limiter) = &self.rate_limiter {
                            limiter.on_success(endpoint);
                        }
                        if attempt > 1 {
                            info!(path, attempt, "Request succeeded after retry");
                        }
                        return Ok(body);
                    }
                    Err(err) => (err, Some(token)),
                },
                Err(err) => (err, None),
            };

            match err {
                ApiError::Unauthorized(message) => {
                    if reauthenticated {
                        warn!(path, "Access token rejected again after refresh");
                        return Err(ApiError::Unauthorized(message));
                    }
                    reauthenticated = true;
                    if let Some(token) = token {
                        self.tokens.invalidate(&token).await;
                    }
                    info!(path, "Access token rejected, re-authenticating");
                }
                err if err.is_transient() => {
                    let delay = match &err {
                        ApiError::TooManyRequests { retry_after } => {
                            if let Some(limiter) = &self.rate_limiter {
                                limiter.on_throttle(endpoint);
                            }
                            *retry_after
                        }
                        _ => fallback_delay,
                    };

                    if attempt >= max_attempts {
                        warn!(path, attempts = attempt, error = %err, "Retry limit exhausted");
                        return Err(ApiError::RetriesExhausted {
                            path: path.to_string(),
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }

                    warn!(
                        path,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                err => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: &AccessToken,
        fallback_delay: Duration,
    ) -> Result<Value, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .header(AUTHORIZATION, self.authorization(token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| {
                if e.is_decode() {
                    ApiError::InvalidResponse(format!("{path}: {e}"))
                } else {
                    ApiError::Network(e)
                }
            });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_retry_after(v, fallback_delay));
        let body = response.text().await.unwrap_or_default();
        let message = excerpt(&body);
        debug!(path, status = status.as_u16(), body = %message, "Request failed");

        Err(match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized(message),
            StatusCode::NOT_FOUND => ApiError::NotFound(path.to_string()),
            StatusCode::TOO_MANY_REQUESTS => ApiError::TooManyRequests {
                retry_after: retry_after.unwrap_or(fallback_delay),
            },
            s if s.is_server_error() => ApiError::ServerError {
                status: s.as_u16(),
                message,
            },
            s => ApiError::ClientError {
                status: s.as_u16(),
                message,
            },
        })
    }
}

impl std::fmt::Debug for LoyaltyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoyaltyClient")
            .field("base_url", &self.base_url)
            .field("auth_scheme", &self.auth_scheme)
            .field("retry", &self.retry)
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

/// Query parameters shared by the paginated list endpoints
///
/// Results are requested in ascending `updated_at` order so a run cut short
/// by the page ceiling can resume from its checkpoint.
pub fn list_query(
    page: u32,
    page_size: u32,
    updated_since: Option<DateTime<Utc>>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("page", page.to_string()),
        ("per_page", page_size.to_string()),
        ("limit", page_size.to_string()),
        ("order", "updated_at_asc".to_string()),
    ];
    if let Some(since) = updated_since {
        query.push(("updated_at_from", format_timestamp(&since)));
    }
    query
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

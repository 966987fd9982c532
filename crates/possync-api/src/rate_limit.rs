//! Rate limiting and adaptive throttling for the loyalty platform API
//!
//! Keeps request pressure below the platform's limits so that HTTP 429
//! responses are the exception rather than the steady state.
//!
//! ## Architecture
//!
//! - [`TokenBucket`]: classic token bucket, one per [`Endpoint`]
//! - [`AdaptiveRateLimiter`]: owns the buckets and adapts their capacity to
//!   server feedback (halved on 429, recovered gradually on success)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use possync_api::rate_limit::{AdaptiveRateLimiter, Endpoint};
//! use possync_core::config::RateLimitingConfig;
//!
//! # async fn example() {
//! let limiter = AdaptiveRateLimiter::from_config(&RateLimitingConfig::default());
//! limiter.acquire(Endpoint::Customers).await;
//! // ... make API call ...
//! limiter.on_success(Endpoint::Customers);
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use possync_core::config::RateLimitingConfig;
use tracing::{debug, info, warn};

/// Consecutive successes needed before capacity grows again
const RECOVERY_INTERVAL: u64 = 50;

/// Longest `Retry-After` honored when given as an HTTP date
const MAX_RETRY_AFTER_SECS: u64 = 3600;

// ============================================================================
// Endpoint
// ============================================================================

/// API resources that are rate limited independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Customers,
    Membership,
    Orders,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::Customers, Endpoint::Membership, Endpoint::Orders];

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Customers => "customers",
            Endpoint::Membership => "membership",
            Endpoint::Orders => "orders",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TokenBucket
// ============================================================================

#[derive(Debug)]
struct BucketState {
    /// Fractional for smooth refill
    tokens: f64,
    last_refill: Instant,
    /// Reduced by throttling, never above the configured capacity
    effective_capacity: u32,
    successes: u64,
}

/// Token bucket rate limiter for a single endpoint
///
/// Tokens are consumed on each request and refilled at a constant rate.
/// The bucket starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
                effective_capacity: capacity,
                successes: 0,
            }),
        }
    }

    /// A bucket allowing `per_minute` requests, with bursts up to that number
    pub fn per_minute(per_minute: u32) -> Self {
        Self::new(per_minute, f64::from(per_minute.max(1)) / 60.0)
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(state: &mut BucketState, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens =
                (state.tokens + elapsed * refill_rate).min(f64::from(state.effective_capacity));
            state.last_refill = now;
        }
    }

    /// Takes one token if available
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        Self::refill(&mut state, self.refill_rate);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds until the next token is available; 0.0 if one is available now
    pub fn time_until_available(&self) -> f64 {
        let mut state = self.lock();
        Self::refill(&mut state, self.refill_rate);
        if state.tokens >= 1.0 {
            0.0
        } else if self.refill_rate > 0.0 {
            (1.0 - state.tokens) / self.refill_rate
        } else {
            f64::MAX
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut state = self.lock();
        Self::refill(&mut state, self.refill_rate);
        state.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn effective_capacity(&self) -> u32 {
        self.lock().effective_capacity
    }

    /// Every [`RECOVERY_INTERVAL`] consecutive successes, grows the effective
    /// capacity by 10% (at least 1) up to the configured capacity
    pub fn on_success(&self) {
        let mut state = self.lock();
        state.successes += 1;
        if state.successes % RECOVERY_INTERVAL == 0 && state.effective_capacity < self.capacity {
            let increase = (state.effective_capacity / 10).max(1);
            let grown = (state.effective_capacity + increase).min(self.capacity);
            debug!(
                old_capacity = state.effective_capacity,
                new_capacity = grown,
                "Adaptive recovery: increasing bucket capacity"
            );
            state.effective_capacity = grown;
        }
    }

    /// Halves the effective capacity (minimum 1) and drains the bucket
    pub fn on_throttle(&self) {
        let mut state = self.lock();
        let old = state.effective_capacity;
        state.effective_capacity = (old / 2).max(1);
        state.tokens = 0.0;
        state.successes = 0;
        warn!(
            old_capacity = old,
            new_capacity = state.effective_capacity,
            "Throttle detected: reducing bucket capacity by 50%"
        );
    }
}

// ============================================================================
// AdaptiveRateLimiter
// ============================================================================

/// Owns one [`TokenBucket`] per [`Endpoint`]
///
/// Shared through `Arc<AdaptiveRateLimiter>`. A disabled limiter never waits
/// but still records throttle events in the log.
pub struct AdaptiveRateLimiter {
    buckets: HashMap<Endpoint, TokenBucket>,
    enabled: bool,
}

impl fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("enabled", &self.enabled)
            .field("endpoints", &self.buckets.len())
            .finish()
    }
}

impl AdaptiveRateLimiter {
    /// Builds per-endpoint buckets from requests-per-minute settings
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        let buckets = Endpoint::ALL
            .into_iter()
            .map(|endpoint| {
                let per_minute = match endpoint {
                    Endpoint::Customers => config.customers_requests_per_minute,
                    Endpoint::Membership => config.membership_requests_per_minute,
                    Endpoint::Orders => config.orders_requests_per_minute,
                };
                debug!(%endpoint, per_minute, "Creating token bucket");
                (endpoint, TokenBucket::per_minute(per_minute))
            })
            .collect();

        Self {
            buckets,
            enabled: config.enabled,
        }
    }

    /// A limiter that never delays requests
    pub fn disabled() -> Self {
        Self::from_config(&RateLimitingConfig {
            enabled: false,
            ..RateLimitingConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn bucket(&self, endpoint: Endpoint) -> Option<&TokenBucket> {
        self.buckets.get(&endpoint)
    }

    /// Waits until a token for `endpoint` is available and takes it
    pub async fn acquire(&self, endpoint: Endpoint) {
        if !self.enabled {
            return;
        }
        let Some(bucket) = self.bucket(endpoint) else {
            return;
        };
        while !bucket.try_acquire() {
            let wait = Duration::from_secs_f64(bucket.time_until_available().clamp(0.01, 60.0));
            debug!(
                %endpoint,
                wait_ms = wait.as_millis() as u64,
                "No tokens available, waiting for refill"
            );
            tokio::time::sleep(wait).await;
        }
    }

    pub fn on_success(&self, endpoint: Endpoint) {
        if let Some(bucket) = self.bucket(endpoint) {
            bucket.on_success();
        }
    }

    /// Records an HTTP 429 for `endpoint`
    pub fn on_throttle(&self, endpoint: Endpoint) {
        info!(%endpoint, "Recording throttle event for endpoint");
        if let Some(bucket) = self.bucket(endpoint) {
            bucket.on_throttle();
        }
    }

    pub fn effective_capacity(&self, endpoint: Endpoint) -> Option<u32> {
        self.bucket(endpoint).map(TokenBucket::effective_capacity)
    }
}

// ============================================================================
// Retry-After parsing
// ============================================================================

/// Parses a `Retry-After` header value
///
/// Accepts delta-seconds (`"30"`) or an HTTP date; dates in the past or more
/// than an hour away fall back to `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let remaining = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(secs) = u64::try_from(remaining.num_seconds()) {
            if secs <= MAX_RETRY_AFTER_SECS {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

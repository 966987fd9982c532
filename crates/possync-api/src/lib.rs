//! possync API - loyalty platform client
//!
//! Provides an async client for:
//! - OAuth2 password-grant authentication with a cached, single-flight token
//! - Paginated customer and order listings, per-customer membership lookups
//! - Retry with exponential backoff and jitter, honoring `Retry-After`
//! - Proactive per-endpoint rate limiting
//!
//! ## Modules
//!
//! - [`auth`] - Token acquisition and caching
//! - [`client`] - Authenticated HTTP client with the retry policy
//! - [`payload`] - Wire-format decoding of list and membership responses
//! - [`provider`] - [`ILoyaltyApi`](possync_core::ports::ILoyaltyApi) adapter
//! - [`rate_limit`] - Token buckets and `Retry-After` parsing

pub mod auth;
pub mod client;
pub mod payload;
pub mod provider;
pub mod rate_limit;

use std::time::Duration;

use possync_core::ports::RemoteError;
use thiserror::Error;

/// Errors that can occur when talking to the loyalty platform
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API rejected the access token (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The token endpoint refused the credentials
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The token endpoint could not be reached or answered with garbage
    #[error("Token request failed: {0}")]
    TokenRequest(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// The request was refused (4xx other than 401/404/429)
    #[error("Client error (HTTP {status}): {message}")]
    ClientError { status: u16, message: String },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Transient failures persisted through every attempt
    #[error("{path} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        last: String,
    },

    /// The client could not be built from its settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::TooManyRequests { .. }
                | ApiError::ServerError { .. }
                | ApiError::Network(_)
                | ApiError::TokenRequest(_)
        )
    }

    /// Whether the failure is about credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::AuthFailed(_))
    }
}

impl From<ApiError> for RemoteError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(msg) | ApiError::AuthFailed(msg) => {
                RemoteError::AuthRejected(msg)
            }
            ApiError::NotFound(msg) => RemoteError::NotFound(msg),
            ApiError::ClientError { status, message } => RemoteError::Rejected { status, message },
            ApiError::RetriesExhausted {
                path,
                attempts,
                last,
            } => RemoteError::RetriesExhausted {
                path,
                attempts,
                last_error: last,
            },
            ApiError::InvalidResponse(msg) | ApiError::Config(msg) => {
                RemoteError::InvalidResponse(msg)
            }
            transient => RemoteError::RetriesExhausted {
                path: String::new(),
                attempts: 1,
                last_error: transient.to_string(),
            },
        }
    }
}

//! OAuth2 token acquisition for the loyalty platform
//!
//! The platform issues long-lived access tokens (typically 30 days) through a
//! resource-owner password grant. [`TokenManager`] acquires a token on first
//! use, caches it, and re-acquires it when it is about to expire or when the
//! API rejects it.
//!
//! ## Concurrency
//!
//! Readers share the cached token through an `RwLock`. Acquisition is
//! serialized by a separate `Mutex`, so a burst of concurrent callers that all
//! find the cache empty results in exactly one token request.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::{BasicClient, BasicErrorResponse},
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, Scope, TokenResponse, TokenUrl,
};
use possync_core::config::AuthConfig;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::ApiError;

/// Lifetime assumed when the token response omits `expires_in` (30 days)
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 2_592_000;

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 300;

type PasswordGrantClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

// ============================================================================
// AccessToken
// ============================================================================

/// A bearer credential together with its validity window
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
    refresh_after: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token issued at `issued_at` that lives for `lifetime`
    pub fn new(secret: impl Into<String>, lifetime: Duration, issued_at: DateTime<Utc>) -> Self {
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);
        let usable = if lifetime > margin * 2 {
            lifetime - margin
        } else {
            lifetime
        };
        Self {
            secret: secret.into(),
            expires_at: issued_at + lifetime,
            refresh_after: issued_at + usable,
        }
    }

    /// The raw token value for the `Authorization` header
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token can still be used at `now` without refreshing
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_after
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Computes the cached lifetime from the server's `expires_in`
///
/// A missing value falls back to [`DEFAULT_TOKEN_LIFETIME_SECS`]; the result
/// never exceeds `max_lifetime`.
pub fn token_lifetime(expires_in: Option<std::time::Duration>, max_lifetime: Duration) -> Duration {
    let reported = expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
    reported.min(max_lifetime)
}

// ============================================================================
// TokenCredentials
// ============================================================================

/// Everything needed to request a token
#[derive(Clone)]
pub struct TokenCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub username: String,
    pub password: String,
    pub scopes: Vec<String>,
    pub max_lifetime: Duration,
    pub request_timeout: std::time::Duration,
}

impl TokenCredentials {
    /// Reads credentials from the `auth` config section
    ///
    /// Fails when the client id, username or password is missing.
    pub fn from_config(
        auth: &AuthConfig,
        request_timeout: std::time::Duration,
    ) -> Result<Self, ApiError> {
        if auth.client_id.trim().is_empty() {
            return Err(ApiError::Config("auth.client_id is not set".into()));
        }
        if auth.username.trim().is_empty() {
            return Err(ApiError::Config("auth.username is not set".into()));
        }
        let password = auth
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::Config("auth.password is not set".into()))?;

        Ok(Self {
            token_url: auth.token_url.clone(),
            client_id: auth.client_id.clone(),
            client_secret: auth.client_secret.clone().filter(|s| !s.is_empty()),
            username: auth.username.clone(),
            password,
            scopes: auth.scopes.clone(),
            max_lifetime: Duration::days(i64::from(auth.max_token_lifetime_days.max(1))),
            request_timeout,
        })
    }
}

impl fmt::Debug for TokenCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scopes", &self.scopes)
            .finish()
    }
}

// ============================================================================
// TokenManager
// ============================================================================

/// Acquires, caches and invalidates the platform access token
pub struct TokenManager {
    oauth: PasswordGrantClient,
    http: reqwest::Client,
    username: ResourceOwnerUsername,
    password: ResourceOwnerPassword,
    scopes: Vec<Scope>,
    max_lifetime: Duration,
    cached: RwLock<Option<AccessToken>>,
    acquire_lock: Mutex<()>,
}

impl TokenManager {
    /// Builds a manager; no network traffic happens until [`token`](Self::token)
    pub fn new(credentials: TokenCredentials) -> Result<Self, ApiError> {
        let token_url = TokenUrl::new(credentials.token_url.clone()).map_err(|e| {
            ApiError::Config(format!(
                "invalid token URL '{}': {e}",
                credentials.token_url
            ))
        })?;

        let mut oauth = BasicClient::new(ClientId::new(credentials.client_id))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);
        if let Some(secret) = credentials.client_secret {
            oauth = oauth.set_client_secret(ClientSecret::new(secret));
        }

        // Redirects are never followed on the token endpoint
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(credentials.request_timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build token HTTP client: {e}")))?;

        Ok(Self {
            oauth,
            http,
            username: ResourceOwnerUsername::new(credentials.username),
            password: ResourceOwnerPassword::new(credentials.password),
            scopes: credentials.scopes.into_iter().map(Scope::new).collect(),
            max_lifetime: credentials.max_lifetime,
            cached: RwLock::new(None),
            acquire_lock: Mutex::new(()),
        })
    }

    /// Returns a usable token, acquiring one if the cache is empty or stale
    pub async fn token(&self) -> Result<AccessToken, ApiError> {
        if let Some(token) = self.cached_fresh().await {
            return Ok(token);
        }

        let _guard = self.acquire_lock.lock().await;
        // A concurrent caller may have refreshed while we waited for the lock
        if let Some(token) = self.cached_fresh().await {
            return Ok(token);
        }

        let token = self.request_token().await?;
        *self.cached.write().await = Some(token.clone());
        Ok(token)
    }

    /// Drops `stale` from the cache after the API rejected it
    ///
    /// A token that was already replaced is left alone, so concurrent
    /// requests failing with the same old token trigger only one refresh.
    pub async fn invalidate(&self, stale: &AccessToken) {
        let mut cached = self.cached.write().await;
        if cached.as_ref().is_some_and(|t| t.secret == stale.secret) {
            warn!("Access token rejected by the API, discarding cached token");
            *cached = None;
        }
    }

    /// Whether a token is currently cached (fresh or not)
    pub async fn has_cached_token(&self) -> bool {
        self.cached.read().await.is_some()
    }

    async fn cached_fresh(&self) -> Option<AccessToken> {
        let now = Utc::now();
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_fresh(now))
            .cloned()
    }

    async fn request_token(&self) -> Result<AccessToken, ApiError> {
        debug!(username = %self.username.as_str(), "Requesting access token");

        let response = self
            .oauth
            .exchange_password(&self.username, &self.password)
            .add_scopes(self.scopes.clone())
            .request_async(&self.http)
            .await
            .map_err(classify_token_error)?;

        let lifetime = token_lifetime(response.expires_in(), self.max_lifetime);
        let token = AccessToken::new(
            response.access_token().secret().clone(),
            lifetime,
            Utc::now(),
        );
        info!(
            expires_at = %token.expires_at(),
            "Acquired access token"
        );
        Ok(token)
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("username", &self.username.as_str())
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

/// An error response from the token endpoint means the credentials are bad;
/// anything else (transport, unparseable body) may go away on retry.
fn classify_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> ApiError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => ApiError::AuthFailed(response.to_string()),
        RequestTokenError::Request(e) => ApiError::TokenRequest(e.to_string()),
        RequestTokenError::Parse(e, _) => {
            ApiError::TokenRequest(format!("unparseable token response: {e}"))
        }
        RequestTokenError::Other(msg) => ApiError::TokenRequest(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> TokenCredentials {
        TokenCredentials {
            token_url: "https://id.example.test/oauth/token".into(),
            client_id: "client".into(),
            client_secret: Some("s3cret".into()),
            username: "ops@example.test".into(),
            password: "hunter2".into(),
            scopes: vec![],
            max_lifetime: Duration::days(30),
            request_timeout: std::time::Duration::from_secs(5),
        }
    }

    #[test]
    fn test_token_refreshes_before_expiry() {
        let issued = Utc::now();
        let token = AccessToken::new("abc", Duration::hours(1), issued);
        assert_eq!(token.expires_at(), issued + Duration::hours(1));
        assert!(token.is_fresh(issued + Duration::minutes(50)));
        assert!(!token.is_fresh(issued + Duration::minutes(56)));
    }

    #[test]
    fn test_short_lived_token_uses_full_lifetime() {
        let issued = Utc::now();
        let token = AccessToken::new("abc", Duration::seconds(120), issued);
        assert!(token.is_fresh(issued + Duration::seconds(119)));
        assert!(!token.is_fresh(issued + Duration::seconds(120)));
    }

    #[test]
    fn test_lifetime_defaults_to_thirty_days() {
        let lifetime = token_lifetime(None, Duration::days(90));
        assert_eq!(lifetime, Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
    }

    #[test]
    fn test_lifetime_is_capped() {
        let reported = std::time::Duration::from_secs(365 * 86_400);
        assert_eq!(token_lifetime(Some(reported), Duration::days(30)), Duration::days(30));

        let reported = std::time::Duration::from_secs(3_600);
        assert_eq!(token_lifetime(Some(reported), Duration::days(30)), Duration::hours(1));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let token = AccessToken::new("very-secret-token", Duration::hours(1), Utc::now());
        assert!(!format!("{token:?}").contains("very-secret-token"));

        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_credentials_require_password() {
        let mut auth = AuthConfig {
            client_id: "client".into(),
            username: "ops@example.test".into(),
            ..AuthConfig::default()
        };
        let err = TokenCredentials::from_config(&auth, std::time::Duration::from_secs(5))
            .unwrap_err();
        assert!(err.to_string().contains("password"));

        auth.password = Some("hunter2".into());
        let creds =
            TokenCredentials::from_config(&auth, std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(creds.password, "hunter2");
        assert_eq!(creds.max_lifetime, Duration::days(30));
    }

    #[test]
    fn test_invalid_token_url_is_rejected() {
        let mut creds = credentials();
        creds.token_url = "not a url".into();
        assert!(matches!(TokenManager::new(creds), Err(ApiError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalidate_ignores_replaced_token() {
        let manager = TokenManager::new(credentials()).unwrap();
        let current = AccessToken::new("current", Duration::hours(1), Utc::now());
        *manager.cached.write().await = Some(current.clone());

        let old = AccessToken::new("old", Duration::hours(1), Utc::now());
        manager.invalidate(&old).await;
        assert!(manager.has_cached_token().await);

        manager.invalidate(&current).await;
        assert!(!manager.has_cached_token().await);
    }

    #[tokio::test]
    async fn test_cached_token_is_served_without_network() {
        let manager = TokenManager::new(credentials()).unwrap();
        let current = AccessToken::new("current", Duration::hours(1), Utc::now());
        *manager.cached.write().await = Some(current.clone());

        assert_eq!(manager.token().await.unwrap(), current);
    }
}

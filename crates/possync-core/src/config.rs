//! Configuration module for possync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, environment overrides for credentials, validation, defaults,
//! and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for possync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub rate_limiting: RateLimitingConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Remote loyalty platform endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST API, without trailing slash.
    pub base_url: String,
    /// Scheme placed before the token in the `Authorization` header.
    pub auth_scheme: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// OAuth2 resource-owner credentials.
///
/// `client_secret` and `password` are normally supplied through the
/// environment rather than the YAML file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub scopes: Vec<String>,
    /// Upper bound on the lifetime of a cached token, in days.
    pub max_token_lifetime_days: u32,
}

/// Sync pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Requested page size.
    pub page_size: u32,
    /// Largest page size the remote accepts; `page_size` is clamped to it.
    pub max_page_size: u32,
    /// Page ceiling for a single run.
    pub max_pages_per_run: u32,
    /// Records per local write transaction.
    pub batch_size: usize,
    /// Concurrent membership lookups per page.
    pub membership_concurrency: usize,
    /// RUNNING rows older than this are considered abandoned.
    pub stale_run_timeout_secs: u64,
    /// Seconds between scheduled incremental runs in the daemon.
    pub poll_interval_secs: u64,
    /// Terminal runs older than this many days are pruned by the daemon.
    pub run_retention_days: u32,
    /// Maximum number of error lines reported per run.
    pub error_summary_limit: usize,
}

/// Retry policy for transient remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Remote API rate-limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    pub customers_requests_per_minute: u32,
    pub membership_requests_per_minute: u32,
    pub orders_requests_per_minute: u32,
}

/// Local SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("scopes", &self.scopes)
            .field("max_token_lifetime_days", &self.max_token_lifetime_days)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Environment variables that override credential fields.
pub const ENV_CLIENT_ID: &str = "POSSYNC_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "POSSYNC_CLIENT_SECRET";
pub const ENV_USERNAME: &str = "POSSYNC_USERNAME";
pub const ENV_PASSWORD: &str = "POSSYNC_PASSWORD";

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/possync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("possync")
            .join("config.yaml")
    }

    /// Overlay credentials from `POSSYNC_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = non_empty(ENV_CLIENT_ID) {
            self.auth.client_id = v;
        }
        if let Some(v) = non_empty(ENV_CLIENT_SECRET) {
            self.auth.client_secret = Some(v);
        }
        if let Some(v) = non_empty(ENV_USERNAME) {
            self.auth.username = v;
        }
        if let Some(v) = non_empty(ENV_PASSWORD) {
            self.auth.password = Some(v);
        }
    }

    /// Copy of the configuration with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |v: &mut Option<String>| {
            if v.is_some() {
                *v = Some("***".to_string());
            }
        };
        mask(&mut copy.auth.client_secret);
        mask(&mut copy.auth.password);
        copy
    }
}

impl SyncConfig {
    /// Page size actually requested from the remote.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.min(self.max_page_size).max(1)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://apis.cnvloyalty.com".to_string(),
            auth_scheme: "TOKEN".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: "https://apis.cnvloyalty.com/oauth/token".to_string(),
            client_id: String::new(),
            client_secret: None,
            username: String::new(),
            password: None,
            scopes: Vec::new(),
            max_token_lifetime_days: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_page_size: 100,
            max_pages_per_run: 100,
            batch_size: 500,
            membership_concurrency: 8,
            stale_run_timeout_secs: 2 * 60 * 60,
            poll_interval_secs: 600,
            run_retention_days: 30,
            error_summary_limit: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            customers_requests_per_minute: 60,
            membership_requests_per_minute: 300,
            orders_requests_per_minute: 60,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("possync")
                .join("possync.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.page_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn error(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Missing
    /// credentials are reported separately by [`Config::missing_credentials`]
    /// because they usually arrive through the environment.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- remote ---
        if url::Url::parse(&self.remote.base_url).is_err() {
            errors.push(error("remote.base_url", "must be an absolute URL"));
        }
        if self.remote.auth_scheme.trim().is_empty() {
            errors.push(error("remote.auth_scheme", "must not be empty"));
        }
        if self.remote.request_timeout_secs == 0 {
            errors.push(error("remote.request_timeout_secs", "must be greater than 0"));
        }

        // --- auth ---
        if url::Url::parse(&self.auth.token_url).is_err() {
            errors.push(error("auth.token_url", "must be an absolute URL"));
        }
        if self.auth.max_token_lifetime_days == 0 {
            errors.push(error("auth.max_token_lifetime_days", "must be greater than 0"));
        }

        // --- sync ---
        let positive_u32 = [
            ("sync.page_size", self.sync.page_size),
            ("sync.max_page_size", self.sync.max_page_size),
            ("sync.max_pages_per_run", self.sync.max_pages_per_run),
            ("sync.run_retention_days", self.sync.run_retention_days),
        ];
        for (field, value) in positive_u32 {
            if value == 0 {
                errors.push(error(field, "must be greater than 0"));
            }
        }
        if self.sync.page_size > self.sync.max_page_size {
            errors.push(error(
                "sync.page_size",
                format!("must not exceed sync.max_page_size ({})", self.sync.max_page_size),
            ));
        }
        if self.sync.batch_size == 0 {
            errors.push(error("sync.batch_size", "must be greater than 0"));
        }
        if self.sync.membership_concurrency == 0 {
            errors.push(error("sync.membership_concurrency", "must be greater than 0"));
        }
        if self.sync.stale_run_timeout_secs == 0 {
            errors.push(error("sync.stale_run_timeout_secs", "must be greater than 0"));
        }
        if self.sync.poll_interval_secs == 0 {
            errors.push(error("sync.poll_interval_secs", "must be greater than 0"));
        }

        // --- retry ---
        if self.retry.max_attempts == 0 {
            errors.push(error("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            errors.push(error(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        // --- rate_limiting ---
        if self.rate_limiting.enabled {
            let limits = [
                (
                    "rate_limiting.customers_requests_per_minute",
                    self.rate_limiting.customers_requests_per_minute,
                ),
                (
                    "rate_limiting.membership_requests_per_minute",
                    self.rate_limiting.membership_requests_per_minute,
                ),
                (
                    "rate_limiting.orders_requests_per_minute",
                    self.rate_limiting.orders_requests_per_minute,
                ),
            ];
            for (field, value) in limits {
                if value == 0 {
                    errors.push(error(field, "must be greater than 0"));
                }
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(error(
                "logging.level",
                format!(
                    "invalid log level '{}'; expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        errors
    }

    /// Required credential fields that are still empty after env overrides.
    ///
    /// `auth.client_secret` is optional: public clients authenticate with
    /// the client id alone.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.auth.client_id.is_empty() {
            missing.push("auth.client_id");
        }
        if self.auth.username.is_empty() {
            missing.push("auth.username");
        }
        if self.auth.password.as_deref().unwrap_or_default().is_empty() {
            missing.push("auth.password");
        }
        missing
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], starting from defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder pre-populated with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.config.auth.token_url = url.into();
        self
    }

    pub fn credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.auth.client_id = client_id.into();
        self.config.auth.client_secret = Some(client_secret.into());
        self.config.auth.username = username.into();
        self.config.auth.password = Some(password.into());
        self
    }

    pub fn page_size(mut self, n: u32) -> Self {
        self.config.sync.page_size = n;
        self
    }

    pub fn max_pages_per_run(mut self, n: u32) -> Self {
        self.config.sync.max_pages_per_run = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.sync.batch_size = n;
        self
    }

    pub fn retry(mut self, max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.config.retry = RetryConfig {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        };
        self
    }

    pub fn rate_limiting_enabled(mut self, enabled: bool) -> Self {
        self.config.rate_limiting.enabled = enabled;
        self
    }

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database.path = path;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.remote.base_url, "https://apis.cnvloyalty.com");
        assert_eq!(cfg.remote.auth_scheme, "TOKEN");
        assert_eq!(cfg.auth.max_token_lifetime_days, 30);
        assert_eq!(cfg.sync.page_size, 100);
        assert_eq!(cfg.sync.max_pages_per_run, 100);
        assert_eq!(cfg.sync.batch_size, 500);
        assert_eq!(cfg.sync.stale_run_timeout_secs, 7200);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!(cfg.rate_limiting.enabled);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.database.path.ends_with("possync/possync.db"));
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    #[test]
    fn default_config_is_missing_required_credentials() {
        let missing = Config::default().missing_credentials();
        assert_eq!(
            missing,
            vec!["auth.client_id", "auth.username", "auth.password"]
        );
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
remote:
  base_url: http://localhost:8080
  auth_scheme: Bearer
auth:
  client_id: pos
  username: sync@example.com
sync:
  page_size: 50
  batch_size: 200
logging:
  level: debug
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.remote.base_url, "http://localhost:8080");
        assert_eq!(cfg.remote.auth_scheme, "Bearer");
        assert_eq!(cfg.remote.request_timeout_secs, 60);
        assert_eq!(cfg.auth.client_id, "pos");
        assert!(cfg.auth.password.is_none());
        assert_eq!(cfg.sync.page_size, 50);
        assert_eq!(cfg.sync.batch_size, 200);
        assert_eq!(cfg.sync.max_pages_per_run, 100);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.page_size, 100);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    #[test]
    fn env_overrides_replace_credentials() {
        let env: HashMap<&str, &str> = [
            (ENV_CLIENT_ID, "env-client"),
            (ENV_CLIENT_SECRET, "env-secret"),
            (ENV_PASSWORD, "hunter2"),
            (ENV_USERNAME, ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = ConfigBuilder::new()
            .credentials("file-client", "file-secret", "file-user", "file-pass")
            .build();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.auth.client_id, "env-client");
        assert_eq!(cfg.auth.client_secret.as_deref(), Some("env-secret"));
        assert_eq!(cfg.auth.username, "file-user");
        assert_eq!(cfg.auth.password.as_deref(), Some("hunter2"));
        assert!(cfg.missing_credentials().is_empty());
    }

    #[test]
    fn redacted_masks_secrets() {
        let cfg = ConfigBuilder::new()
            .credentials("id", "secret", "user", "pass")
            .build()
            .redacted();
        assert_eq!(cfg.auth.client_secret.as_deref(), Some("***"));
        assert_eq!(cfg.auth.password.as_deref(), Some("***"));
        assert_eq!(cfg.auth.client_id, "id");

        let debug = format!("{:?}", ConfigBuilder::new().credentials("id", "s3", "u", "p4").build());
        assert!(!debug.contains("s3"));
        assert!(!debug.contains("p4"));
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_values() {
        let mut cfg = Config::default();
        cfg.sync.batch_size = 0;
        cfg.sync.max_pages_per_run = 0;
        cfg.retry.max_attempts = 0;
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"sync.batch_size".to_string()));
        assert!(fields.contains(&"sync.max_pages_per_run".to_string()));
        assert!(fields.contains(&"retry.max_attempts".to_string()));
    }

    #[test]
    fn validate_catches_page_size_above_maximum() {
        let cfg = ConfigBuilder::new().page_size(250).build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sync.page_size");
    }

    #[test]
    fn validate_catches_invalid_urls() {
        let cfg = ConfigBuilder::new()
            .base_url("not a url")
            .token_url("")
            .build();
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["remote.base_url", "auth.token_url"]);
    }

    #[test]
    fn validate_skips_rate_limits_when_disabled() {
        let mut cfg = Config::default();
        cfg.rate_limiting.membership_requests_per_minute = 0;
        assert_eq!(cfg.validate().len(), 1);
        cfg.rate_limiting.enabled = false;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let cfg = ConfigBuilder::new().logging_level("verbose").build();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("verbose"));
    }

    #[test]
    fn effective_page_size_is_clamped() {
        let mut sync = SyncConfig::default();
        sync.page_size = 500;
        assert_eq!(sync.effective_page_size(), 100);
        sync.page_size = 0;
        assert_eq!(sync.effective_page_size(), 1);
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let result = ConfigBuilder::new().batch_size(0).build_validated();
        assert!(result.is_err());
        assert!(ConfigBuilder::new().build_validated().is_ok());
    }

    #[test]
    fn default_path_ends_with_config_yaml() {
        let path = Config::default_path();
        assert!(path.ends_with("possync/config.yaml"));
    }

    #[test]
    fn validation_error_display() {
        let err = error("sync.page_size", "must be greater than 0");
        assert_eq!(err.to_string(), "sync.page_size: must be greater than 0");
    }
}

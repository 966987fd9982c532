//! Shared command wiring: configuration, database and orchestrator
//!
//! Every command starts from a [`CliContext`]. Commands that only read the
//! local database call [`CliContext::open_store`]; `sync` additionally builds
//! the remote client stack through [`CliContext::orchestrator`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use possync_api::provider::LoyaltyApiProvider;
use possync_core::config::Config;
use possync_store::{DatabasePool, SqliteSyncStore};
use possync_sync::engine::{SyncOrchestrator, SyncSettings};
use tracing::{debug, info};

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Configuration and output settings resolved from the global flags
pub struct CliContext {
    pub config_path: PathBuf,
    pub config: Config,
    /// Whether `config_path` existed and parsed
    pub config_loaded: bool,
    pub format: OutputFormat,
}

impl CliContext {
    /// Loads the config file (or defaults) and applies `POSSYNC_*` overrides
    pub fn load(path: Option<PathBuf>, format: OutputFormat) -> Self {
        let config_path = path.unwrap_or_else(Config::default_path);
        let (mut config, config_loaded) = match Config::load(&config_path) {
            Ok(config) => (config, true),
            Err(e) => {
                debug!(path = %config_path.display(), error = %e, "Using default configuration");
                (Config::default(), false)
            }
        };
        config.apply_env_overrides();

        Self {
            config_path,
            config,
            config_loaded,
            format,
        }
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format.is_json())
    }

    pub fn db_path(&self) -> &Path {
        &self.config.database.path
    }

    /// Opens the local database, creating and migrating it if needed
    pub async fn open_store(&self) -> Result<Arc<SqliteSyncStore>> {
        let pool = DatabasePool::new(self.db_path())
            .await
            .with_context(|| format!("Failed to open database {}", self.db_path().display()))?;
        Ok(Arc::new(SqliteSyncStore::new(pool.pool().clone())))
    }

    /// Opens the local database only if it already exists
    pub async fn open_existing_store(&self) -> Result<Option<Arc<SqliteSyncStore>>> {
        if !self.db_path().exists() {
            return Ok(None);
        }
        self.open_store().await.map(Some)
    }

    /// Builds an orchestrator against the configured remote and database
    pub async fn orchestrator(&self, settings: SyncSettings) -> Result<SyncOrchestrator> {
        let invalid = self.config.validate();
        if !invalid.is_empty() {
            let lines: Vec<String> = invalid.iter().map(ToString::to_string).collect();
            bail!("Invalid configuration: {}", lines.join("; "));
        }
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            bail!(
                "Missing credentials: {} (set them in {} or via POSSYNC_* variables)",
                missing.join(", "),
                self.config_path.display()
            );
        }

        let api = Arc::new(
            LoyaltyApiProvider::from_config(&self.config)
                .context("Failed to build loyalty platform client")?,
        );
        let store = self.open_store().await?;
        info!(
            base_url = %self.config.remote.base_url,
            db = %self.db_path().display(),
            "Wired sync orchestrator"
        );
        Ok(SyncOrchestrator::new(
            api,
            store.clone(),
            store.clone(),
            store,
            settings,
        ))
    }
}

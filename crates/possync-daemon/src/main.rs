//! possync Daemon - Background synchronization service
//!
//! This binary runs as a long-lived service and handles:
//! - Periodic incremental sync of customers and orders
//! - Daily pruning of old run-log entries
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Configuration, database pool, token manager, HTTP client and
//! orchestrator are wired once at start-up. A [`SyncScheduler`] then polls
//! every sync type on `sync.poll_interval_secs`. A single
//! `CancellationToken` is both the scheduler's stop signal and the
//! orchestrator's kill signal, so a shutdown stops in-flight runs at the
//! next page boundary (recorded as FAILED, checkpoint untouched).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use possync_api::provider::LoyaltyApiProvider;
use possync_core::config::Config;
use possync_core::ports::IRunLog;
use possync_store::{DatabasePool, SqliteSyncStore};
use possync_sync::engine::{SyncOrchestrator, SyncSettings};
use possync_sync::scheduler::SyncScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Overrides the configuration file location
const ENV_CONFIG_PATH: &str = "POSSYNC_CONFIG";

const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Daemon
// ============================================================================

struct Daemon {
    config: Config,
    store: Arc<SqliteSyncStore>,
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Opens the database and builds the client stack
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let invalid = config.validate();
        if !invalid.is_empty() {
            for e in &invalid {
                error!(field = %e.field, message = %e.message, "Invalid configuration");
            }
            bail!("configuration has {} error(s)", invalid.len());
        }
        let missing = config.missing_credentials();
        if !missing.is_empty() {
            bail!("missing credentials: {}", missing.join(", "));
        }

        let pool = DatabasePool::new(&config.database.path)
            .await
            .context("Failed to open database")?;
        let store = Arc::new(SqliteSyncStore::new(pool.pool().clone()));

        let api = Arc::new(
            LoyaltyApiProvider::from_config(&config)
                .context("Failed to build loyalty platform client")?,
        );

        let orchestrator = SyncOrchestrator::new(
            api,
            store.clone(),
            store.clone(),
            store.clone(),
            SyncSettings::from_config(&config.sync),
        )
        .with_cancellation(shutdown.clone());

        info!(
            base_url = %config.remote.base_url,
            db = %config.database.path.display(),
            "Daemon wired"
        );

        Ok(Self {
            config,
            store,
            orchestrator: Arc::new(orchestrator),
            shutdown,
        })
    }

    /// Runs the scheduler and the pruning loop until shutdown
    async fn run(&self) -> Result<()> {
        let poll_interval = Duration::from_secs(self.config.sync.poll_interval_secs.max(1));
        let scheduler =
            SyncScheduler::new(self.orchestrator.clone(), poll_interval, self.shutdown.clone());

        let prune = prune_loop(
            self.store.clone(),
            self.config.sync.run_retention_days,
            PRUNE_INTERVAL,
            self.shutdown.clone(),
        );

        tokio::join!(scheduler.run(), prune);
        info!("Daemon stopped");
        Ok(())
    }
}

/// Oldest start time kept in the run log
fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(retention_days.max(1)))
}

/// Deletes finished runs past retention, once per `every`, until shutdown
async fn prune_loop(
    runs: Arc<dyn IRunLog>,
    retention_days: u32,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let cutoff = retention_cutoff(Utc::now(), retention_days);
                match runs.prune_before(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => info!(deleted = n, cutoff = %cutoff, "Pruned old runs"),
                    Err(e) => warn!(error = %format!("{e:#}"), "Failed to prune run log"),
                }
            }
        }
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

fn config_path(env_value: Option<String>) -> PathBuf {
    env_value
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path(std::env::var(ENV_CONFIG_PATH).ok());
    let load_result = Config::load(&path);
    let mut config = match &load_result {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };
    config.apply_env_overrides();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    match load_result {
        Ok(_) => info!(config_path = %path.display(), "Loaded configuration"),
        Err(e) => warn!(
            config_path = %path.display(),
            error = %e,
            "Could not load configuration file, using defaults"
        ),
    }
    info!(version = env!("CARGO_PKG_VERSION"), "possyncd starting");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let daemon = Daemon::new(config, shutdown).await?;
    daemon.run().await
}

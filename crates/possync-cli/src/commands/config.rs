//! Config command - View and validate possync configuration
//!
//! Provides the `possync config` CLI command which:
//! 1. Shows the effective configuration (file + `POSSYNC_*` overrides), secrets masked
//! 2. Validates it and reports every error and missing credential
//! 3. Prints the path of the configuration file in use

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::context::CliContext;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration
    Validate,
    /// Print the configuration file path
    Path,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => show(ctx),
            ConfigCommand::Validate => validate(ctx),
            ConfigCommand::Path => path(ctx),
        }
    }
}

fn show(ctx: &CliContext) -> Result<()> {
    let formatter = ctx.formatter();
    let config = ctx.config.redacted();
    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if ctx.format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let source = if ctx.config_loaded {
        ctx.config_path.display().to_string()
    } else {
        format!("defaults, {} not found", ctx.config_path.display())
    };
    formatter.success(&format!("Configuration ({source})"));
    formatter.info("");
    let yaml =
        serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn validate(ctx: &CliContext) -> Result<()> {
    let formatter = ctx.formatter();
    let errors: Vec<String> = ctx.config.validate().iter().map(ToString::to_string).collect();
    let missing = ctx.config.missing_credentials();

    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "path": ctx.config_path,
            "loaded": ctx.config_loaded,
            "valid": errors.is_empty() && missing.is_empty(),
            "errors": errors,
            "missing_credentials": missing,
        }));
    } else {
        if !ctx.config_loaded {
            formatter.warn(&format!(
                "{} not found, validating defaults",
                ctx.config_path.display()
            ));
        }
        for error in &errors {
            formatter.error(error);
        }
        for field in &missing {
            formatter.error(&format!("{field}: not set"));
        }
        if errors.is_empty() && missing.is_empty() {
            formatter.success("Configuration is valid");
        }
    }

    if !errors.is_empty() || !missing.is_empty() {
        bail!(
            "configuration has {} problem(s)",
            errors.len() + missing.len()
        );
    }
    Ok(())
}

fn path(ctx: &CliContext) -> Result<()> {
    if ctx.format.is_json() {
        ctx.formatter().print_json(&serde_json::json!({
            "path": ctx.config_path,
            "exists": ctx.config_loaded,
        }));
    } else {
        println!("{}", ctx.config_path.display());
    }
    Ok(())
}

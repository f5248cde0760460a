//! Config command - View and check Replisync configuration
//!
//! Provides the `replisync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports errors

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use replisync_core::config::Config;

use super::CliContext;
use crate::output::get_formatter;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Validate => self.execute_validate(ctx),
        }
    }

    fn execute_show(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);

        info!(config_path = %ctx.config_path.display(), "Showing configuration");

        if ctx.format.is_json() {
            let json = serde_json::to_value(&ctx.config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
        if !ctx.config_path.exists() {
            formatter.info("(file not found, showing defaults)");
        }
        formatter.info("");

        let yaml =
            serde_yaml::to_string(&ctx.config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            formatter.info(line);
        }
        Ok(())
    }

    fn execute_validate(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let path = &ctx.config_path;

        info!(config_path = %path.display(), "Validating configuration");

        if !path.exists() {
            report(ctx, &[format!("file not found: {}", path.display())]);
            return Ok(());
        }

        // Load explicitly so that parse errors surface instead of falling back to defaults
        let errors: Vec<String> = match Config::load(path) {
            Ok(config) => config.validate().iter().map(ToString::to_string).collect(),
            Err(e) => vec![format!("parse error: {e}")],
        };

        if errors.is_empty() {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": true,
                    "config_path": path.display().to_string(),
                }));
            } else {
                formatter.success(&format!("Configuration is valid ({})", path.display()));
            }
        } else {
            report(ctx, &errors);
        }
        Ok(())
    }
}

fn report(ctx: &CliContext, errors: &[String]) {
    let formatter = get_formatter(ctx.format);
    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "valid": false,
            "config_path": ctx.config_path.display().to_string(),
            "errors": errors,
        }));
        return;
    }
    formatter.error(&format!(
        "Configuration has {} error(s) ({})",
        errors.len(),
        ctx.config_path.display()
    ));
    for error in errors {
        formatter.info(&format!("- {error}"));
    }
}

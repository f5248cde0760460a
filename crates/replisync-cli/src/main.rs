//! Replisync CLI - Command-line interface for Replisync
//!
//! Provides commands for:
//! - Applying a single batch file to the local replica
//! - Replaying a directory-backed change feed for every configured stream
//! - Viewing stream cursors and replica counts
//! - Showing and validating the configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod source;

use commands::{
    apply::ApplyCommand, config::ConfigCommand, replay::ReplayCommand, status::StatusCommand,
    CliContext,
};
use output::OutputFormat;
use replisync_core::config::Config;

#[derive(Debug, Parser)]
#[command(name = "replisync", version, about = "Event-driven metadata replica sync")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply one batch file to the replica
    Apply(ApplyCommand),
    /// Replay the batch directory for every configured stream
    Replay(ReplayCommand),
    /// Show stream cursors and replica counts
    Status(StatusCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn init_tracing(verbose: u8, config: &Config, json: bool) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    init_tracing(cli.verbose, &config, cli.log_json || config.logging.json);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext {
        config,
        config_path,
        format,
    };

    match cli.command {
        Commands::Apply(cmd) => cmd.execute(&ctx).await,
        Commands::Replay(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    }
}

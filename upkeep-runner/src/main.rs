//! Upkeep
//!
//! Upgrades the operating system packages of this host and keeps an audit
//! trail of every attempt in a per-host log file.
//!
//! Architecture:
//! - Configuration: `UPKEEP_*` environment variables with defaults
//! - Host: host name and OS description, resolved once at start
//! - Audit log: append-only per-host log shared with the invoked tools
//! - Process: the single abstraction every external command goes through
//! - Services: the upgrade run itself
//!
//! Exit codes: 0 when the upgrade succeeded, 5 when the upgrade command
//! failed, 1 when the run could not be carried out at all.

mod audit_log;
mod commands;
mod config;
mod host;
mod process;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Commands, handle_command};
use crate::config::Config;

#[derive(Parser)]
#[command(name = "upkeep")]
#[command(about = "Upgrade this host's OS packages with an auditable log", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Diagnostics go to stderr, the audit log keeps its own format
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upkeep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = load_config()?;
    info!(
        "Loaded configuration: log_dir={}, service={}",
        config.log_dir.display(),
        config.service_name
    );

    let host = host::discover().context("Failed to resolve host context")?;

    handle_command(cli.command.unwrap_or(Commands::Run), &config, &host).await
}

/// Loads configuration from environment variables and validates it
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid configuration in environment")?;
    config.validate()?;
    Ok(config)
}

//! Commands module
//!
//! Defines the CLI commands and their handlers.

mod last_run;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;
use upkeep_core::domain::host::HostContext;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Upgrade this host (the default when no command is given)
    Run,
    /// Show the most recent run recorded in this host's audit log
    LastRun {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// List every recorded run instead of only the latest
        #[arg(long, conflicts_with = "success")]
        all: bool,

        /// Show the most recent successful upgrade instead
        #[arg(long)]
        success: bool,
    },
}

/// Handle a CLI command
///
/// Returns the process exit code the command settled on.
pub async fn handle_command(
    command: Commands,
    config: &Config,
    host: &HostContext,
) -> Result<ExitCode> {
    match command {
        Commands::Run => run::handle_run(config, host).await,
        Commands::LastRun { json, all, success } => last_run::handle_last_run(
            config,
            host,
            json,
            last_run::Selection::from_flags(all, success),
        ),
    }
}

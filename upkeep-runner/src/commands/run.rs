//! Run command handler

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use upkeep_core::domain::host::HostContext;

use crate::config::Config;
use crate::process::{CommandRunner, SystemCommandRunner};
use crate::service::{StepResult, UpdateRunner};

/// Performs one upgrade run and maps its outcome to the exit code
pub async fn handle_run(config: &Config, host: &HostContext) -> Result<ExitCode> {
    let commands: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new());
    let runner = UpdateRunner::new(config.clone(), commands);

    let report = runner
        .run(host)
        .await
        .context("Upgrade run could not be carried out")?;

    let failed: Vec<String> = report
        .housekeeping
        .iter()
        .filter(|step| matches!(step.result, StepResult::Failed(_)))
        .map(|step| step.step.to_string())
        .collect();
    if !failed.is_empty() {
        warn!(
            "Upgrade succeeded but {} failed, see {}",
            failed.join(", "),
            report.log_path.display()
        );
    }

    info!(
        "Run {} finished in state {:?}: outcome={}, exit_code={}",
        report.run_id,
        report.final_state,
        report.outcome,
        report.exit_code()
    );

    Ok(ExitCode::from(report.exit_code()))
}

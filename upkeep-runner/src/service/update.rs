//! Update service
//!
//! Carries out one upgrade run on the local host:
//! - Preparing the audit log and writing the start banner
//! - Invoking the package upgrade with its output redirected into the log
//! - Classifying the result and writing the terminal banner
//! - Best-effort housekeeping after a successful upgrade
//!
//! The exit status of the upgrade command is the only input to the outcome.
//! Housekeeping failures are recorded as warnings and never change it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};
use upkeep_core::domain::host::HostContext;
use upkeep_core::domain::outcome::{RunState, TransitionError, UpdateOutcome};
use uuid::Uuid;

use crate::audit_log::{self, AuditError, AuditLog};
use crate::config::Config;
use crate::process::{CommandRunner, HostCommand, Output};

/// Errors that prevent a run from being carried out at all
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Best-effort steps following a successful upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HousekeepingStep {
    CacheClean,
    CacheDrop,
    ServiceRestart,
}

impl fmt::Display for HousekeepingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HousekeepingStep::CacheClean => write!(f, "cache cleanup"),
            HousekeepingStep::CacheDrop => write!(f, "cache drop"),
            HousekeepingStep::ServiceRestart => write!(f, "service restart"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Completed,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: HousekeepingStep,
    pub result: StepResult,
}

/// What happened during one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: UpdateOutcome,
    pub final_state: RunState,
    pub log_path: PathBuf,
    pub housekeeping: Vec<StepReport>,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

/// Performs upgrade runs
pub struct UpdateRunner {
    config: Config,
    commands: Arc<dyn CommandRunner>,
}

impl UpdateRunner {
    pub fn new(config: Config, commands: Arc<dyn CommandRunner>) -> Self {
        Self { config, commands }
    }

    /// Runs one complete upgrade attempt for `host`
    ///
    /// An `Err` means the audit log could not be prepared or written before
    /// the outcome was recorded; every other failure ends in a report.
    pub async fn run(&self, host: &HostContext) -> Result<RunReport, RunnerError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, host = %host.hostname);
        self.run_inner(run_id, host).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, host: &HostContext) -> Result<RunReport, RunnerError> {
        let mut state = RunState::Start;

        audit_log::ensure_log_dir(&self.config.log_dir, self.config.log_owner.as_ref())?;
        let log = AuditLog::open(&self.config.log_dir, host, self.config.lock_log)?;
        state = self.advance(state, RunState::LoggingReady)?;

        log.start_banner(host)?;
        log.sync()?;
        state = self.advance(state, RunState::BannerWritten)?;

        info!(
            "Upgrading {} on {} (log: {})",
            host.os_description,
            host.hostname,
            log.path().display()
        );

        let upgrade = HostCommand::shell(&self.config.upgrade_command)
            .env("DEBIAN_FRONTEND", "noninteractive");
        state = self.advance(state, RunState::UpgradeRunning)?;

        let outcome = match self.commands.run(&upgrade, Output::AuditLog(&log)).await {
            Ok(status) => {
                debug!("Upgrade command finished with {}", status);
                UpdateOutcome::from_exit_code(status.code)
            }
            Err(e) => {
                error!("Upgrade command could not run: {}", e);
                UpdateOutcome::Failure
            }
        };

        log.terminal_banner(outcome)?;

        let mut report = RunReport {
            run_id,
            outcome,
            final_state: state,
            log_path: log.path().to_path_buf(),
            housekeeping: Vec::new(),
        };

        if !outcome.is_success() {
            state = self.advance(state, RunState::Failed)?;
            report.final_state = self.advance(state, RunState::DoneWithError)?;
            error!(
                "Upgrade failed, see {} (exit code {})",
                report.log_path.display(),
                report.exit_code()
            );
            return Ok(report);
        }

        state = self.advance(state, RunState::Succeeded)?;
        info!("Upgrade completed successfully");

        let clean = self
            .housekeeping(
                &log,
                HousekeepingStep::CacheClean,
                &self.config.clean_command,
                Output::Inherit,
            )
            .await;
        report.housekeeping.push(clean);

        if let Err(e) = log.sync() {
            warn!("Failed to flush audit log before dropping caches: {}", e);
        }
        let drop_caches = self
            .housekeeping(
                &log,
                HousekeepingStep::CacheDrop,
                &self.config.drop_caches_command,
                Output::Inherit,
            )
            .await;
        report.housekeeping.push(drop_caches);
        state = self.advance(state, RunState::CacheCleaned)?;

        let restart = self.restart_service(&log).await;
        report.housekeeping.push(restart);
        state = self.advance(state, RunState::ServiceRestarted)?;

        report.final_state = self.advance(state, RunState::Done)?;
        Ok(report)
    }

    async fn housekeeping(
        &self,
        log: &AuditLog,
        step: HousekeepingStep,
        script: &str,
        output: Output<'_>,
    ) -> StepReport {
        if script.trim().is_empty() {
            debug!("No command configured for {}, skipping", step);
            return StepReport {
                step,
                result: StepResult::Skipped,
            };
        }

        self.invoke(log, step, &HostCommand::shell(script), output)
            .await
    }

    async fn restart_service(&self, log: &AuditLog) -> StepReport {
        let command = HostCommand::new("systemctl")
            .arg("restart")
            .arg(&self.config.service_name);

        self.invoke(
            log,
            HousekeepingStep::ServiceRestart,
            &command,
            Output::AuditLog(log),
        )
        .await
    }

    async fn invoke(
        &self,
        log: &AuditLog,
        step: HousekeepingStep,
        command: &HostCommand,
        output: Output<'_>,
    ) -> StepReport {
        let result = match self.commands.run(command, output).await {
            Ok(status) if status.success() => StepResult::Completed,
            Ok(status) => StepResult::Failed(status.to_string()),
            Err(e) => StepResult::Failed(e.to_string()),
        };

        match &result {
            StepResult::Failed(detail) => {
                warn!("{} failed: {}", step, detail);
                if let Err(e) = log.warning(&format!("{} failed ({})", step, detail)) {
                    warn!("Failed to record {} failure in audit log: {}", step, e);
                }
            }
            _ => debug!("{} completed", step),
        }

        StepReport { step, result }
    }

    fn advance(&self, from: RunState, to: RunState) -> Result<RunState, TransitionError> {
        let next = from.advance(to)?;
        debug!("Run state {:?} -> {:?}", from, next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandStatus, ProcessError};
    use async_trait::async_trait;
    use crate::config::LogOwner;
    use nix::unistd::{Uid, User};
    use std::collections::HashMap;
    use std::os::unix::fs::MetadataExt;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};
    use upkeep_core::domain::log::{FAILURE_MESSAGE, RULE_MARKER, SUCCESS_MESSAGE};
    use upkeep_core::history;

    /// Records invocations and answers with scripted exit codes
    ///
    /// Commands are matched by substring; unmatched commands exit 0.
    /// Commands redirected into the audit log write one line of output there.
    #[derive(Default)]
    struct FakeCommandRunner {
        calls: Mutex<Vec<HostCommand>>,
        exit_codes: HashMap<&'static str, Option<i32>>,
        unspawnable: Vec<&'static str>,
    }

    impl FakeCommandRunner {
        fn exit(mut self, pattern: &'static str, code: Option<i32>) -> Self {
            self.exit_codes.insert(pattern, code);
            self
        }

        fn unspawnable(mut self, pattern: &'static str) -> Self {
            self.unspawnable.push(pattern);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.to_string())
                .collect()
        }

        fn count(&self, pattern: &str) -> usize {
            self.calls().iter().filter(|c| c.contains(pattern)).count()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeCommandRunner {
        async fn run(
            &self,
            command: &HostCommand,
            output: Output<'_>,
        ) -> Result<CommandStatus, ProcessError> {
            self.calls.lock().unwrap().push(command.clone());
            let rendered = command.to_string();

            if self.unspawnable.iter().any(|p| rendered.contains(p)) {
                return Err(ProcessError::Spawn {
                    command: rendered,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }

            if let Output::AuditLog(log) = output {
                log.append_raw(&format!("tool output of {}\n", rendered))?;
            }

            let code = self
                .exit_codes
                .iter()
                .find(|(pattern, _)| rendered.contains(*pattern))
                .map(|(_, code)| *code)
                .unwrap_or(Some(0));

            Ok(CommandStatus { code })
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::new(dir.path().join("log").join("update-os"));
        config.upgrade_command = "fake-upgrade".to_string();
        config.clean_command = "fake-clean".to_string();
        config.drop_caches_command = "fake-drop".to_string();
        config.service_name = "fake-monitor".to_string();
        config
    }

    fn host() -> HostContext {
        HostContext::new("pi4", "Raspbian GNU/Linux 11 (bullseye)")
    }

    async fn run_with(config: Config, fake: Arc<FakeCommandRunner>) -> (RunReport, String) {
        let runner = UpdateRunner::new(config, fake);
        let report = runner.run(&host()).await.unwrap();
        let content = std::fs::read_to_string(&report.log_path).unwrap();
        (report, content)
    }

    fn position(content: &str, needle: &str) -> usize {
        content
            .find(needle)
            .unwrap_or_else(|| panic!("'{}' not found in log", needle))
    }

    #[tokio::test]
    async fn test_successful_run() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let log_dir = config.log_dir.clone();
        let fake = Arc::new(FakeCommandRunner::default());

        let (report, content) = run_with(config, fake.clone()).await;

        assert_eq!(report.outcome, UpdateOutcome::Success);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.final_state, RunState::Done);
        assert!(
            report
                .housekeeping
                .iter()
                .all(|s| s.result == StepResult::Completed)
        );

        let start = position(&content, "upgrade Raspbian GNU/Linux 11 (bullseye) on pi4");
        let tool = position(&content, "tool output of /bin/sh -c fake-upgrade");
        let success = position(&content, SUCCESS_MESSAGE);
        assert!(start < tool && tool < success);
        assert_eq!(content.matches(SUCCESS_MESSAGE).count(), 1);
        assert!(!content.contains(FAILURE_MESSAGE));

        // Restart output lands after the terminal banner
        let restart = position(&content, "tool output of systemctl restart fake-monitor");
        assert!(success < restart);

        let calls = fake.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].ends_with("fake-upgrade"));
        assert!(calls[1].ends_with("fake-clean"));
        assert!(calls[2].ends_with("fake-drop"));
        assert_eq!(calls[3], "systemctl restart fake-monitor");
        assert_eq!(fake.count("systemctl restart"), 1);

        let files: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert!(log_dir.join("pi4-update-os.log").is_file());
    }

    #[tokio::test]
    async fn test_failed_run_stops_before_housekeeping() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(FakeCommandRunner::default().exit("fake-upgrade", Some(1)));

        let (report, content) = run_with(test_config(&dir), fake.clone()).await;

        assert_eq!(report.outcome, UpdateOutcome::Failure);
        assert_eq!(report.exit_code(), 5);
        assert_eq!(report.final_state, RunState::DoneWithError);
        assert!(report.housekeeping.is_empty());

        assert_eq!(content.matches(FAILURE_MESSAGE).count(), 1);
        assert!(!content.contains(SUCCESS_MESSAGE));
        assert_eq!(fake.calls().len(), 1);
        assert_eq!(fake.count("systemctl restart"), 0);
        assert_eq!(fake.count("fake-clean"), 0);

        // Terminal banner closes the log
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[lines.len() - 3].ends_with(RULE_MARKER));
        assert!(lines[lines.len() - 2].ends_with(FAILURE_MESSAGE));
        assert_eq!(lines[lines.len() - 1].len(), 19);
    }

    #[tokio::test]
    async fn test_killed_upgrade_is_failure() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(FakeCommandRunner::default().exit("fake-upgrade", None));

        let (report, content) = run_with(test_config(&dir), fake.clone()).await;

        assert_eq!(report.exit_code(), 5);
        assert!(content.contains(FAILURE_MESSAGE));
        assert_eq!(fake.count("systemctl"), 0);
    }

    #[tokio::test]
    async fn test_unspawnable_upgrade_is_failure() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(FakeCommandRunner::default().unspawnable("fake-upgrade"));

        let (report, content) = run_with(test_config(&dir), fake.clone()).await;

        assert_eq!(report.outcome, UpdateOutcome::Failure);
        assert_eq!(report.exit_code(), 5);
        assert!(content.contains(FAILURE_MESSAGE));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_housekeeping_failures_do_not_change_outcome() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(
            FakeCommandRunner::default()
                .exit("fake-clean", Some(100))
                .unspawnable("systemctl"),
        );

        let (report, content) = run_with(test_config(&dir), fake.clone()).await;

        assert_eq!(report.outcome, UpdateOutcome::Success);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.final_state, RunState::Done);
        assert_eq!(
            report.housekeeping[0],
            StepReport {
                step: HousekeepingStep::CacheClean,
                result: StepResult::Failed("exit status 100".to_string()),
            }
        );
        assert_eq!(report.housekeeping[1].result, StepResult::Completed);
        assert!(matches!(report.housekeeping[2].result, StepResult::Failed(_)));

        assert!(content.contains("WARNING: cache cleanup failed (exit status 100)"));
        assert!(content.contains("WARNING: service restart failed (failed to start"));
        assert!(position(&content, SUCCESS_MESSAGE) < position(&content, "WARNING:"));
        assert!(!content.contains(FAILURE_MESSAGE));

        let run = history::last_run(&content).unwrap();
        assert_eq!(run.outcome, Some(UpdateOutcome::Success));
        assert_eq!(run.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_housekeeping_commands_are_skipped() {
        let dir = tempdir().unwrap();
        let mut config = test_config(&dir);
        config.clean_command = String::new();
        config.drop_caches_command = " ".to_string();
        let fake = Arc::new(FakeCommandRunner::default());

        let (report, _) = run_with(config, fake.clone()).await;

        assert_eq!(report.housekeeping[0].result, StepResult::Skipped);
        assert_eq!(report.housekeeping[1].result, StepResult::Skipped);
        assert_eq!(report.housekeeping[2].result, StepResult::Completed);
        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_runs_unattended() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(FakeCommandRunner::default());

        run_with(test_config(&dir), fake.clone()).await;

        let calls = fake.calls.lock().unwrap();
        assert!(
            calls[0]
                .env
                .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()))
        );
    }

    #[tokio::test]
    async fn test_consecutive_runs_append() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);

        let (_, first) = run_with(config.clone(), Arc::new(FakeCommandRunner::default())).await;
        let failing = FakeCommandRunner::default().exit("fake-upgrade", Some(2));
        let (report, second) = run_with(config, Arc::new(failing)).await;

        assert!(second.starts_with(&first));
        assert_eq!(report.exit_code(), 5);

        let runs = history::read_runs(&second);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].outcome, Some(UpdateOutcome::Success));
        assert_eq!(runs[1].outcome, Some(UpdateOutcome::Failure));
        assert!(runs[0].started_at <= runs[1].started_at);
    }

    #[tokio::test]
    async fn test_fresh_log_dir_gets_configured_owner() {
        let dir = tempdir().unwrap();
        let current = User::from_uid(Uid::current()).unwrap().unwrap();
        let mut config = test_config(&dir);
        config.log_owner = Some(LogOwner {
            user: current.name.clone(),
            group: None,
        });
        let log_dir = config.log_dir.clone();

        let (report, _) = run_with(config, Arc::new(FakeCommandRunner::default())).await;

        assert_eq!(report.exit_code(), 0);
        let meta = std::fs::metadata(&log_dir).unwrap();
        assert_eq!(meta.uid(), current.uid.as_raw());
        assert_eq!(meta.gid(), current.gid.as_raw());
    }

    #[tokio::test]
    async fn test_unusable_log_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("log");
        std::fs::write(&blocker, "not a directory").unwrap();

        let fake = Arc::new(FakeCommandRunner::default());
        let runner = UpdateRunner::new(test_config(&dir), fake.clone());
        let result = runner.run(&host()).await;

        assert!(matches!(
            result,
            Err(RunnerError::Audit(AuditError::CreateDir { .. }))
        ));
        assert!(fake.calls().is_empty());
    }
}

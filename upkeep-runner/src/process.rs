//! External command execution
//!
//! Every external program a run invokes (upgrade, cache cleanup, cache
//! drop, service restart) goes through `CommandRunner`. The system
//! implementation spawns the program and waits for it; tests substitute
//! their own implementation to observe call order.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tracing::debug;

use crate::audit_log::{AuditError, AuditLog};

/// Shell used to run configured command strings
pub const SHELL: &str = "/bin/sh";

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Runs `script` through `/bin/sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(SHELL).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Where a command's stdout and stderr go
#[derive(Clone, Copy)]
pub enum Output<'a> {
    /// Both streams appended to the audit log
    AuditLog(&'a AuditLog),
    /// Both streams inherited from this process
    Inherit,
}

/// Exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
}

impl CommandStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{command}': {source}")]
    Spawn { command: String, source: io::Error },

    #[error("failed to wait for '{command}': {source}")]
    Wait { command: String, source: io::Error },

    #[error("failed to redirect output into the audit log: {0}")]
    Redirect(#[from] AuditError),
}

/// Runs external commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command`, streaming its output to `output`, and returns its exit status
    async fn run(
        &self,
        command: &HostCommand,
        output: Output<'_>,
    ) -> Result<CommandStatus, ProcessError>;
}

/// Spawns real processes on the host
pub struct SystemCommandRunner {}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        command: &HostCommand,
        output: Output<'_>,
    ) -> Result<CommandStatus, ProcessError> {
        debug!("Executing: {}", command);

        let mut process = tokio::process::Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());

        match output {
            Output::AuditLog(log) => {
                process.stdout(log.redirect()?).stderr(log.redirect()?);
            }
            Output::Inherit => {
                process.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let mut child = process.spawn().map_err(|source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let status = child.wait().await.map_err(|source| ProcessError::Wait {
            command: command.to_string(),
            source,
        })?;

        let status = CommandStatus {
            code: status.code(),
        };
        debug!("'{}' finished with {}", command, status);
        Ok(status)
    }
}

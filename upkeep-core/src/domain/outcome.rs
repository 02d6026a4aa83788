//! Run outcome and lifecycle types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Exit code of a run whose upgrade command succeeded
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code of a run whose upgrade command failed
pub const EXIT_UPGRADE_FAILED: u8 = 5;

/// Terminal classification of one run
///
/// Derived only from the exit status of the upgrade invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Success,
    Failure,
}

impl UpdateOutcome {
    /// Classifies an exit code; `None` means the process was killed by a signal
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => UpdateOutcome::Success,
            _ => UpdateOutcome::Failure,
        }
    }

    /// Process exit code reported for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            UpdateOutcome::Success => EXIT_SUCCESS,
            UpdateOutcome::Failure => EXIT_UPGRADE_FAILED,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success)
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Success => write!(f, "success"),
            UpdateOutcome::Failure => write!(f, "failure"),
        }
    }
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Start,
    LoggingReady,
    BannerWritten,
    UpgradeRunning,
    Succeeded,
    CacheCleaned,
    ServiceRestarted,
    Failed,
    Done,
    DoneWithError,
}

/// Attempted transition outside the run lifecycle graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid run state transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

impl RunState {
    /// Moves to `next`, rejecting edges the lifecycle does not have
    pub fn advance(self, next: RunState) -> Result<RunState, TransitionError> {
        use RunState::*;

        let allowed = matches!(
            (self, next),
            (Start, LoggingReady)
                | (LoggingReady, BannerWritten)
                | (BannerWritten, UpgradeRunning)
                | (UpgradeRunning, Succeeded)
                | (UpgradeRunning, Failed)
                | (Succeeded, CacheCleaned)
                | (CacheCleaned, ServiceRestarted)
                | (ServiceRestarted, Done)
                | (Failed, DoneWithError)
        );

        if allowed {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

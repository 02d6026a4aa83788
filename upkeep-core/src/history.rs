//! Run history
//!
//! Reconstructs past runs from the text of an audit log. Only banner lines
//! matter; tool output interleaved between them is skipped.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::log::{LogEntry, LogLine, RunEvent, WARNING_PREFIX};
use crate::domain::outcome::UpdateOutcome;

/// One run as recorded in the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: NaiveDateTime,
    pub os_description: String,
    pub hostname: String,

    /// `None` when the log ends before a terminal banner (interrupted run)
    pub outcome: Option<UpdateOutcome>,
    pub finished_at: Option<NaiveDateTime>,

    /// Housekeeping warnings appended after the terminal banner
    pub warnings: Vec<String>,
}

impl RunRecord {
    pub fn is_interrupted(&self) -> bool {
        self.outcome.is_none()
    }
}

/// Returns every run found in `content`, oldest first
pub fn read_runs(content: &str) -> Vec<RunRecord> {
    let mut runs: Vec<RunRecord> = Vec::new();

    for entry in content.lines().filter_map(LogEntry::parse) {
        match entry.line.event() {
            Some(RunEvent::Started {
                os_description,
                hostname,
            }) => runs.push(RunRecord {
                started_at: entry.timestamp,
                os_description,
                hostname,
                outcome: None,
                finished_at: None,
                warnings: Vec::new(),
            }),
            Some(RunEvent::Succeeded) => finish(&mut runs, UpdateOutcome::Success, entry.timestamp),
            Some(RunEvent::Failed) => finish(&mut runs, UpdateOutcome::Failure, entry.timestamp),
            None => {
                if let LogLine::Message(text) = &entry.line {
                    if let Some(warning) = text.strip_prefix(WARNING_PREFIX) {
                        if let Some(run) = runs.last_mut() {
                            run.warnings.push(warning.to_string());
                        }
                    }
                }
            }
        }
    }

    runs
}

fn finish(runs: &mut [RunRecord], outcome: UpdateOutcome, at: NaiveDateTime) {
    // A terminal banner belongs to the latest run only if that run is still open
    if let Some(run) = runs.last_mut().filter(|run| run.outcome.is_none()) {
        run.outcome = Some(outcome);
        run.finished_at = Some(at);
    }
}

/// The most recent run, finished or not
pub fn last_run(content: &str) -> Option<RunRecord> {
    read_runs(content).pop()
}

/// The most recent run whose upgrade succeeded
pub fn last_success(content: &str) -> Option<RunRecord> {
    read_runs(content)
        .into_iter()
        .rev()
        .find(|run| run.outcome == Some(UpdateOutcome::Success))
}

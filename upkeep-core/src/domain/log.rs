//! Audit log domain types
//!
//! One run appends a sequence of timestamped lines to the per-host log file.
//! External tools write into the same file, so a line that does not start
//! with a timestamp is foreign output and carries no meaning here.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local timestamp prefix of every audit line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Marker token of a rule (separator) line
pub const RULE_MARKER: &str = "----------------------------------------";

/// Message written when the upgrade command exits successfully
pub const SUCCESS_MESSAGE: &str = "upgrade successfully completed";

/// Message written when the upgrade command fails
pub const FAILURE_MESSAGE: &str = "ERROR occurred during upgrade, please check";

/// Prefix of a housekeeping warning line
pub const WARNING_PREFIX: &str = "WARNING: ";

const START_PREFIX: &str = "upgrade ";
const START_SEPARATOR: &str = " on ";

/// Body of an audit line, everything after the timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLine {
    /// Free text message
    Message(String),
    /// Separator line
    Rule,
    /// Timestamp alone, marks a run boundary
    Boundary,
}

impl LogLine {
    /// The `upgrade <OS> on <host>` line of the start banner
    pub fn start(os_description: &str, hostname: &str) -> Self {
        LogLine::Message(format!(
            "{START_PREFIX}{os_description}{START_SEPARATOR}{hostname}"
        ))
    }

    pub fn success() -> Self {
        LogLine::Message(SUCCESS_MESSAGE.to_string())
    }

    pub fn failure() -> Self {
        LogLine::Message(FAILURE_MESSAGE.to_string())
    }

    /// A non-fatal housekeeping warning
    pub fn warning(text: impl fmt::Display) -> Self {
        LogLine::Message(format!("{WARNING_PREFIX}{text}"))
    }

    /// Classifies a line as a run event, if it is one
    pub fn event(&self) -> Option<RunEvent> {
        let LogLine::Message(text) = self else {
            return None;
        };

        match text.as_str() {
            SUCCESS_MESSAGE => Some(RunEvent::Succeeded),
            FAILURE_MESSAGE => Some(RunEvent::Failed),
            other => {
                // Host names never contain spaces, the OS description may
                let rest = other.strip_prefix(START_PREFIX)?;
                let (os_description, hostname) = rest.rsplit_once(START_SEPARATOR)?;
                if hostname.is_empty() || hostname.contains(char::is_whitespace) {
                    return None;
                }
                Some(RunEvent::Started {
                    os_description: os_description.to_string(),
                    hostname: hostname.to_string(),
                })
            }
        }
    }
}

/// A banner event recognised in the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEvent {
    Started {
        os_description: String,
        hostname: String,
    },
    Succeeded,
    Failed,
}

/// A timestamped audit line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub line: LogLine,
}

impl LogEntry {
    pub fn new(timestamp: NaiveDateTime, line: LogLine) -> Self {
        Self { timestamp, line }
    }

    /// Parses one line of the audit file
    ///
    /// Returns `None` for foreign output (anything without a leading timestamp).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let stamp = raw.get(..19)?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

        let rest = &raw[19..];
        let line = if rest.trim().is_empty() {
            LogLine::Boundary
        } else {
            let text = rest.strip_prefix(' ')?;
            if text == RULE_MARKER {
                LogLine::Rule
            } else {
                LogLine::Message(text.to_string())
            }
        };

        Some(Self { timestamp, line })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self.timestamp.format(TIMESTAMP_FORMAT);
        match &self.line {
            LogLine::Message(text) => write!(f, "{stamp} {text}"),
            LogLine::Rule => write!(f, "{stamp} {RULE_MARKER}"),
            LogLine::Boundary => write!(f, "{stamp}"),
        }
    }
}

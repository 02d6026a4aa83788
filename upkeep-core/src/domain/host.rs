//! Host context
//!
//! Identifying data of the machine being upgraded. Resolved once when the
//! process starts and passed explicitly to everything that needs it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Suffix of the per-host audit log file name
pub const LOG_FILE_SUFFIX: &str = "-update-os.log";

/// Description used when os-release carries neither PRETTY_NAME nor NAME
pub const FALLBACK_OS_DESCRIPTION: &str = "Linux";

/// Immutable identity of the host for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostContext {
    /// Short host name (first label of the system host name)
    pub hostname: String,

    /// Human-readable OS description, e.g. "Debian GNU/Linux 12 (bookworm)"
    pub os_description: String,
}

impl HostContext {
    pub fn new(hostname: impl Into<String>, os_description: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            os_description: os_description.into(),
        }
    }

    /// Builds a context from a raw system host name and os-release content
    pub fn from_system(raw_hostname: &str, os_release: Option<&str>) -> Self {
        let os_description = os_release
            .map(os_description_from_release)
            .unwrap_or_else(|| FALLBACK_OS_DESCRIPTION.to_string());

        Self::new(short_hostname(raw_hostname), os_description)
    }

    /// File name of this host's audit log
    pub fn log_file_name(&self) -> String {
        format!("{}{}", self.hostname, LOG_FILE_SUFFIX)
    }
}

/// Strips the domain part of a fully qualified host name
pub fn short_hostname(raw: &str) -> String {
    let raw = raw.trim();
    raw.split('.').next().unwrap_or(raw).to_string()
}

/// Parses os-release content into a key-value map
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }

    vars
}

/// Picks the human-readable OS name out of os-release content
pub fn os_description_from_release(content: &str) -> String {
    let vars = parse_os_release(content);

    ["PRETTY_NAME", "NAME"]
        .iter()
        .filter_map(|key| vars.get(*key))
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_else(|| FALLBACK_OS_DESCRIPTION.to_string())
}

//! Host discovery
//!
//! Resolves the `HostContext` of the local machine: host name from the
//! kernel, OS description from os-release.

use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use upkeep_core::domain::host::HostContext;

const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to read host name: {0}")]
    Hostname(#[from] nix::Error),

    #[error("host name is empty")]
    EmptyHostname,
}

/// Resolves the context of the machine this process runs on
pub fn discover() -> Result<HostContext, HostError> {
    let raw = nix::unistd::gethostname()?;
    let raw = raw.to_string_lossy();
    if raw.trim().is_empty() {
        return Err(HostError::EmptyHostname);
    }

    let os_release = read_os_release(&OS_RELEASE_PATHS);
    if os_release.is_none() {
        warn!("No os-release file found, OS description falls back to a generic name");
    }

    let host = HostContext::from_system(&raw, os_release.as_deref());
    debug!(
        "Resolved host context: hostname={}, os={}",
        host.hostname, host.os_description
    );
    Ok(host)
}

/// Returns the content of the first readable os-release file
fn read_os_release<P: AsRef<Path>>(paths: &[P]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
}

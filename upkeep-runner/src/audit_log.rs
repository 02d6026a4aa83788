//! Per-host audit log
//!
//! The audit log is the durable record of every run. It is opened once per
//! run in append mode and every banner line, as well as the output of the
//! commands redirected into it, goes through the same open file.
//!
//! Lines are formatted completely before being written so each one reaches
//! the file in a single `write` call.

use chrono::Local;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg, OFlag};
use nix::unistd::{Gid, Group, Uid, User};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tracing::{debug, info};
use upkeep_core::domain::host::HostContext;
use upkeep_core::domain::log::{LogEntry, LogLine};
use upkeep_core::domain::outcome::UpdateOutcome;

use crate::config::LogOwner;

/// Errors raised while preparing or writing the audit log
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("failed to look up log owner: {0}")]
    OwnerLookup(nix::Error),

    #[error("failed to change owner of {path}: {source}")]
    Chown { path: PathBuf, source: nix::Error },

    #[error("failed to open log file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to lock log file {path}: {source}")]
    Lock { path: PathBuf, source: nix::Error },

    #[error("failed to write log file: {0}")]
    Write(#[from] io::Error),
}

/// Makes sure the log directory exists
///
/// A missing directory is created and handed to `owner`, or to the operator
/// behind `sudo` when no owner is configured. Returns `true` if the directory
/// was created.
pub fn ensure_log_dir(dir: &Path, owner: Option<&LogOwner>) -> Result<bool, AuditError> {
    if dir.is_dir() {
        return Ok(false);
    }

    std::fs::create_dir_all(dir).map_err(|source| AuditError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    info!("Created log directory {}", dir.display());

    let ids = match owner {
        Some(owner) => Some(resolve_owner(owner)?),
        None => sudo_owner(|key| std::env::var(key).ok()),
    };

    if let Some((uid, gid)) = ids {
        nix::unistd::chown(dir, Some(uid), Some(gid)).map_err(|source| AuditError::Chown {
            path: dir.to_path_buf(),
            source,
        })?;
        debug!("Log directory owned by {}:{}", uid, gid);
    }

    Ok(true)
}

/// Resolves a `user[:group]` owner to numeric ids
///
/// Without a group the user's primary group is used.
fn resolve_owner(owner: &LogOwner) -> Result<(Uid, Gid), AuditError> {
    let user = User::from_name(&owner.user)
        .map_err(AuditError::OwnerLookup)?
        .ok_or_else(|| AuditError::UnknownUser(owner.user.clone()))?;

    let gid = match &owner.group {
        Some(name) => {
            Group::from_name(name)
                .map_err(AuditError::OwnerLookup)?
                .ok_or_else(|| AuditError::UnknownGroup(name.clone()))?
                .gid
        }
        None => user.gid,
    };

    Ok((user.uid, gid))
}

/// Ids of the operator who invoked the process through `sudo`, if any
fn sudo_owner<F>(lookup: F) -> Option<(Uid, Gid)>
where
    F: Fn(&str) -> Option<String>,
{
    let uid = lookup("SUDO_UID")?.trim().parse::<u32>().ok()?;
    let gid = lookup("SUDO_GID")?.trim().parse::<u32>().ok()?;
    Some((Uid::from_raw(uid), Gid::from_raw(gid)))
}

enum LogHandle {
    Plain(File),
    Locked(Flock<File>),
}

impl LogHandle {
    fn file(&self) -> &File {
        match self {
            LogHandle::Plain(file) => file,
            LogHandle::Locked(flock) => &**flock,
        }
    }
}

/// Open audit log of one host
pub struct AuditLog {
    path: PathBuf,
    handle: LogHandle,
}

impl AuditLog {
    /// Opens (creating if needed) the audit log of `host` inside `dir`
    ///
    /// With `lock` set, an exclusive advisory lock is held until the log is
    /// dropped. A concurrent run on the same host waits for it.
    ///
    /// A symlink at the log path is refused: the directory may belong to the
    /// operator while the run itself is privileged.
    pub fn open(dir: &Path, host: &HostContext, lock: bool) -> Result<Self, AuditError> {
        let path = dir.join(host.log_file_name());

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .custom_flags(OFlag::O_NOFOLLOW.bits())
            .open(&path)
            .map_err(|source| AuditError::Open {
                path: path.clone(),
                source,
            })?;

        let handle = if lock {
            LogHandle::Locked(lock_exclusive(file, &path)?)
        } else {
            LogHandle::Plain(file)
        };

        debug!("Opened audit log {}", path.display());
        Ok(Self { path, handle })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped line
    pub fn write(&self, line: LogLine) -> Result<LogEntry, AuditError> {
        let entry = LogEntry::new(Local::now().naive_local(), line);
        let mut file = self.handle.file();
        file.write_all(format!("{}\n", entry).as_bytes())?;
        Ok(entry)
    }

    /// Writes the banner announcing a run
    pub fn start_banner(&self, host: &HostContext) -> Result<(), AuditError> {
        self.write(LogLine::Boundary)?;
        self.write(LogLine::start(&host.os_description, &host.hostname))?;
        self.write(LogLine::Rule)?;
        Ok(())
    }

    /// Writes the banner closing a run with `outcome`
    pub fn terminal_banner(&self, outcome: UpdateOutcome) -> Result<(), AuditError> {
        self.write(LogLine::Rule)?;
        self.write(match outcome {
            UpdateOutcome::Success => LogLine::success(),
            UpdateOutcome::Failure => LogLine::failure(),
        })?;
        self.write(LogLine::Boundary)?;
        Ok(())
    }

    /// Records a non-fatal housekeeping problem
    pub fn warning(&self, text: &str) -> Result<(), AuditError> {
        self.write(LogLine::warning(text))?;
        Ok(())
    }

    /// A handle child processes can write their output into
    pub fn redirect(&self) -> Result<Stdio, AuditError> {
        Ok(Stdio::from(self.handle.file().try_clone()?))
    }

    /// Appends raw text, as a tool writing into the log would
    #[cfg(test)]
    pub fn append_raw(&self, text: &str) -> Result<(), AuditError> {
        let mut file = self.handle.file();
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Flushes the log to stable storage
    pub fn sync(&self) -> Result<(), AuditError> {
        self.handle.file().sync_all()?;
        Ok(())
    }
}

fn lock_exclusive(file: File, path: &Path) -> Result<Flock<File>, AuditError> {
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => Ok(locked),
        Err((file, Errno::EWOULDBLOCK)) => {
            info!(
                "Another run holds {}, waiting for it to finish",
                path.display()
            );
            Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, source)| AuditError::Lock {
                path: path.to_path_buf(),
                source,
            })
        }
        Err((_, source)) => Err(AuditError::Lock {
            path: path.to_path_buf(),
            source,
        }),
    }
}

//! Runner configuration
//!
//! Defines the commands a run invokes and where its audit log lives.
//! Every setting has a default suited to a Debian-family host and can be
//! overridden through `UPKEEP_*` environment variables.

use std::path::PathBuf;

pub const DEFAULT_LOG_DIR: &str = "/var/log/update-os";
pub const DEFAULT_UPGRADE_COMMAND: &str = "apt-get update && apt-get -y upgrade";
pub const DEFAULT_CLEAN_COMMAND: &str = "apt-get -y autoremove && apt-get clean";
pub const DEFAULT_DROP_CACHES_COMMAND: &str = "sync && echo 3 > /proc/sys/vm/drop_caches";
pub const DEFAULT_SERVICE: &str = "rpi-monitor";

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the per-host audit logs
    pub log_dir: PathBuf,

    /// Owner applied to the log directory when it is created
    pub log_owner: Option<LogOwner>,

    /// Shell command performing the unattended package upgrade
    pub upgrade_command: String,

    /// Shell command cleaning the package manager cache
    pub clean_command: String,

    /// Shell command flushing and dropping filesystem caches
    pub drop_caches_command: String,

    /// Systemd unit restarted after a successful upgrade
    pub service_name: String,

    /// Take an exclusive advisory lock on the log file for the whole run
    pub lock_log: bool,
}

/// `user[:group]` owner of the log directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOwner {
    pub user: String,
    pub group: Option<String>,
}

impl LogOwner {
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let (user, group) = match spec.split_once(':') {
            Some((user, group)) => (user, Some(group)),
            None => (spec, None),
        };

        if user.is_empty() {
            anyhow::bail!("log owner '{}' has an empty user", spec);
        }
        if group.is_some_and(str::is_empty) {
            anyhow::bail!("log owner '{}' has an empty group", spec);
        }

        Ok(Self {
            user: user.to_string(),
            group: group.map(str::to_string),
        })
    }
}

impl Config {
    /// Creates a configuration with default commands logging into `log_dir`
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            log_owner: None,
            upgrade_command: DEFAULT_UPGRADE_COMMAND.to_string(),
            clean_command: DEFAULT_CLEAN_COMMAND.to_string(),
            drop_caches_command: DEFAULT_DROP_CACHES_COMMAND.to_string(),
            service_name: DEFAULT_SERVICE.to_string(),
            lock_log: true,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised environment variables (all optional):
    /// - UPKEEP_LOG_DIR (default: /var/log/update-os)
    /// - UPKEEP_LOG_OWNER (user[:group])
    /// - UPKEEP_UPGRADE_CMD
    /// - UPKEEP_CLEAN_CMD
    /// - UPKEEP_DROP_CACHES_CMD
    /// - UPKEEP_SERVICE (default: rpi-monitor)
    /// - UPKEEP_LOCK (true/false, default: true)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("UPKEEP_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if let Some(owner) = lookup("UPKEEP_LOG_OWNER").filter(|s| !s.trim().is_empty()) {
            config.log_owner = Some(LogOwner::parse(owner.trim())?);
        }

        if let Some(cmd) = lookup("UPKEEP_UPGRADE_CMD") {
            config.upgrade_command = cmd;
        }

        if let Some(cmd) = lookup("UPKEEP_CLEAN_CMD") {
            config.clean_command = cmd;
        }

        if let Some(cmd) = lookup("UPKEEP_DROP_CACHES_CMD") {
            config.drop_caches_command = cmd;
        }

        if let Some(service) = lookup("UPKEEP_SERVICE") {
            config.service_name = service;
        }

        if let Some(lock) = lookup("UPKEEP_LOCK") {
            config.lock_log = parse_flag(&lock)
                .ok_or_else(|| anyhow::anyhow!("UPKEEP_LOCK must be true or false, got '{}'", lock))?;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            anyhow::bail!("log_dir cannot be empty");
        }

        if self.upgrade_command.trim().is_empty() {
            anyhow::bail!("upgrade_command cannot be empty");
        }

        if self.service_name.trim().is_empty() {
            anyhow::bail!("service_name cannot be empty");
        }

        if self.service_name.contains(char::is_whitespace) {
            anyhow::bail!("service_name must be a single unit name");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_LOG_DIR))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

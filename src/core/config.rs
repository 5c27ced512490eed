//! Immutable run configuration loaded once from TOML.
//!
//! Every section and field carries a default, so an absent or partial file is
//! valid. The resulting [`Config`] is passed by reference into each
//! component; nothing reads process-wide mutable state.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FdmError, Result};
use crate::scanner::consolidate::DedupPolicy;
use crate::scanner::store::ScanKind;

/// Environment variable naming the default config file.
pub const CONFIG_ENV: &str = "FDM_CONFIG";

/// Config location used when neither `--config` nor `FDM_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fdm/config.toml";

/// Root configuration value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub thresholds: ThresholdsConfig,
    pub scan: ScanConfig,
    pub remote: RemoteConfig,
    pub run: RunConfig,
    pub mail: MailConfig,
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Host list, one `[user@]host[:partitions][:warning][:critical]` per line.
    pub hosts_file: PathBuf,
    /// Hosts excluded from big-item scans and consolidated reports.
    pub exclusion_file: PathBuf,
    /// Directory holding `bigdirs.cache` and `bigfiles.cache`.
    pub cache_dir: PathBuf,
    /// Append-only JSONL activity log.
    pub activity_log: PathBuf,
    /// Process-level run lock.
    pub lock_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            hosts_file: PathBuf::from("/etc/fdm/hosts"),
            exclusion_file: PathBuf::from("/etc/fdm/exclude"),
            cache_dir: PathBuf::from("/var/lib/fdm"),
            activity_log: PathBuf::from("/var/log/fdm/activity.jsonl"),
            lock_file: PathBuf::from("/run/fdm.lock"),
        }
    }
}

/// Global usage-percent thresholds; per-host values override each one
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub warning: u8,
    pub critical: u8,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            warning: 75,
            critical: 90,
        }
    }
}

/// Big-item scan and consolidation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// When false, cache entries are served but never refreshed.
    pub enabled: bool,
    /// Entries older than this many days are rescanned.
    pub staleness_days: u32,
    pub kinds: Vec<ScanKind>,
    /// Lines kept from each remote scan.
    pub items_per_scan: usize,
    /// Rows kept in a consolidated ranking.
    pub consolidated_top: usize,
    pub dedup_policy: DedupPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            staleness_days: 7,
            kinds: vec![ScanKind::Directories, ScanKind::Files],
            items_per_scan: 20,
            consolidated_top: 20,
            dedup_policy: DedupPolicy::FirstSeen,
        }
    }
}

impl ScanConfig {
    #[must_use]
    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.staleness_days) * 86_400)
    }
}

/// Remote command and liveness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub ssh_binary: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub scan_timeout_secs: u64,
    pub ping_binary: String,
    pub ping_attempts: u32,
    pub ping_timeout_secs: u64,
    /// Require a trivial ssh command to succeed before sampling.
    pub check_ssh: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
            scan_timeout_secs: 1800,
            ping_binary: "ping".to_string(),
            ping_attempts: 2,
            ping_timeout_secs: 3,
            check_ssh: true,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    #[must_use]
    pub const fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// Run-wide switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hosts collected concurrently; 1 keeps the sweep strictly sequential.
    pub workers: usize,
    /// Force every known usage percent to 95 to exercise alert paths.
    pub simulate_full: bool,
    /// Produce only the ranked host x partition usage list.
    pub sorted_only: bool,
    /// Emit consolidated big-item rankings after the sweep.
    pub consolidated: bool,
    /// Measure wall-clock time per host.
    pub record_elapsed: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            simulate_full: false,
            sorted_only: false,
            consolidated: true,
            record_elapsed: true,
        }
    }
}

/// Report recipients. Delivery happens outside the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub always: Vec<String>,
    pub on_warning: Vec<String>,
    pub on_critical: Vec<String>,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `FDM_CONFIG` or the default
    /// location is tried and built-in defaults are used when that file is
    /// absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(FdmError::MissingConfig { path });
            }
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| FdmError::io(&path, e))?;
        let config = Self::from_toml_str(&raw)?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML, e.g. for `fdm config` output.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = self.thresholds;
        if t.warning > 100 || t.critical > 100 {
            return Err(FdmError::InvalidConfig {
                details: format!(
                    "thresholds must be within 0..=100 (warning={}, critical={})",
                    t.warning, t.critical
                ),
            });
        }
        if t.warning >= t.critical {
            return Err(FdmError::InvalidConfig {
                details: format!(
                    "thresholds.warning ({}) must be below thresholds.critical ({})",
                    t.warning, t.critical
                ),
            });
        }
        if self.scan.staleness_days == 0 {
            return Err(FdmError::InvalidConfig {
                details: "scan.staleness_days must be at least 1".to_string(),
            });
        }
        if self.scan.consolidated_top == 0 || self.scan.items_per_scan == 0 {
            return Err(FdmError::InvalidConfig {
                details: "scan.consolidated_top and scan.items_per_scan must be positive"
                    .to_string(),
            });
        }
        if self.run.workers == 0 {
            return Err(FdmError::InvalidConfig {
                details: "run.workers must be at least 1".to_string(),
            });
        }
        if self.remote.ping_attempts == 0 {
            return Err(FdmError::InvalidConfig {
                details: "remote.ping_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

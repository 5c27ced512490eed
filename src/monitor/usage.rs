//! Remote filesystem usage sampling.
//!
//! The remote OS is detected once per host and selects a
//! [`DiskUsageQuerier`] dialect; call sites never branch on the OS name.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::errors::{FdmError, Result};
use crate::core::hosts::HostDescriptor;
use crate::remote::ssh::RemoteRunner;
use crate::scanner::store::ScanKind;

/// Percent reported in simulation mode.
pub const SIMULATED_PERCENT: u8 = 95;

/// Remote operating-system family as far as `df`/`du` dialects go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OsKind {
    Linux,
    Darwin,
    FreeBsd,
    OtherBsd,
    Unknown,
}

impl OsKind {
    /// Map `uname -s` output to an OS kind.
    #[must_use]
    pub fn from_uname(raw: &str) -> Self {
        match raw.trim() {
            "Linux" => Self::Linux,
            "Darwin" => Self::Darwin,
            "FreeBSD" => Self::FreeBsd,
            "OpenBSD" | "NetBSD" | "DragonFly" => Self::OtherBsd,
            _ => Self::Unknown,
        }
    }

    /// Dialect used to query this OS.
    #[must_use]
    pub fn querier(self) -> &'static dyn DiskUsageQuerier {
        match self {
            Self::Darwin | Self::FreeBsd | Self::OtherBsd => &BsdDf,
            Self::Linux | Self::Unknown => &PosixDf,
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::FreeBsd => "freebsd",
            Self::OtherBsd => "bsd",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Usage of one partition on one host, valid for the current run only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSample {
    pub host: String,
    pub partition: String,
    pub filesystem: String,
    pub size_bytes: u64,
    pub used_bytes: u64,
    pub avail_bytes: u64,
    /// `None` when the capacity column could not be parsed.
    pub used_percent: Option<u8>,
    pub inode_percent: Option<u8>,
    pub mount_point: String,
    pub os_kind: OsKind,
}

/// Columns extracted from one `df` data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfRow {
    pub filesystem: String,
    pub size_kib: u64,
    pub used_kib: u64,
    pub avail_kib: u64,
    pub used_percent: Option<u8>,
    pub inode_percent: Option<u8>,
    pub mount_point: String,
}

/// One OS dialect of the disk-usage and big-item commands.
pub trait DiskUsageQuerier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shell command printing usage for `partition`.
    fn usage_command(&self, partition: &str) -> String;

    /// Parse the output of [`Self::usage_command`]. `None` when no data line
    /// is present.
    fn parse_usage(&self, output: &str) -> Option<DfRow>;

    /// Shell command listing the largest `limit` items of `kind` under
    /// `partition`, one `size path` pair per line.
    fn scan_command(&self, kind: ScanKind, partition: &str, limit: usize) -> String;
}

/// GNU/POSIX `df -P`, forced into the C locale.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixDf;

/// BSD/Darwin `df`, whose default output carries inode columns inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsdDf;

impl DiskUsageQuerier for PosixDf {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn usage_command(&self, partition: &str) -> String {
        let p = shell_quote(partition);
        format!("LC_ALL=C df -P -k {p} && LC_ALL=C df -P -i {p} 2>/dev/null")
    }

    fn parse_usage(&self, output: &str) -> Option<DfRow> {
        // Block line first, inode line (same layout) second when supported.
        let mut rows = data_lines(output);
        let blocks = rows.next()?;
        let cols: Vec<&str> = blocks.split_whitespace().collect();
        if cols.len() < 6 {
            return None;
        }
        let inode_percent = rows.next().and_then(|line| {
            let icols: Vec<&str> = line.split_whitespace().collect();
            icols.get(4).and_then(|c| parse_percent(c))
        });
        Some(DfRow {
            filesystem: cols[0].to_string(),
            size_kib: cols[1].parse().unwrap_or(0),
            used_kib: cols[2].parse().unwrap_or(0),
            avail_kib: cols[3].parse().unwrap_or(0),
            used_percent: parse_percent(cols[4]),
            inode_percent,
            mount_point: cols[5..].join(" "),
        })
    }

    fn scan_command(&self, kind: ScanKind, partition: &str, limit: usize) -> String {
        let p = shell_quote(partition);
        match kind {
            ScanKind::Directories => {
                format!("du -xh {p} 2>/dev/null | sort -rh | head -n {limit}")
            }
            ScanKind::Files => format!(
                "find {p} -xdev -type f -exec du -h {{}} + 2>/dev/null | sort -rh | head -n {limit}"
            ),
        }
    }
}

impl DiskUsageQuerier for BsdDf {
    fn name(&self) -> &'static str {
        "bsd"
    }

    fn usage_command(&self, partition: &str) -> String {
        format!("df -k -i {}", shell_quote(partition))
    }

    fn parse_usage(&self, output: &str) -> Option<DfRow> {
        // Filesystem 1024-blocks Used Available Capacity iused ifree %iused Mounted on
        let line = data_lines(output).next()?;
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 9 {
            return None;
        }
        Some(DfRow {
            filesystem: cols[0].to_string(),
            size_kib: cols[1].parse().unwrap_or(0),
            used_kib: cols[2].parse().unwrap_or(0),
            avail_kib: cols[3].parse().unwrap_or(0),
            used_percent: parse_percent(cols[4]),
            inode_percent: parse_percent(cols[7]),
            mount_point: cols[8..].join(" "),
        })
    }

    fn scan_command(&self, kind: ScanKind, partition: &str, limit: usize) -> String {
        let p = shell_quote(partition);
        match kind {
            ScanKind::Directories => {
                format!("du -xh {p} 2>/dev/null | sort -rh | head -n {limit}")
            }
            ScanKind::Files => format!(
                "find -x {p} -type f -exec du -h {{}} + 2>/dev/null | sort -rh | head -n {limit}"
            ),
        }
    }
}

fn data_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("Filesystem"))
}

/// Parse a capacity column: digits with an optional trailing `%`.
#[must_use]
pub fn parse_percent(raw: &str) -> Option<u8> {
    let digits = raw.strip_suffix('%').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Single-quote a path for a POSIX shell.
#[must_use]
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Detect the remote OS. Failures fall back to [`OsKind::Unknown`], which
/// queries with the POSIX dialect.
pub fn detect_os(runner: &dyn RemoteRunner, host: &HostDescriptor, timeout: Duration) -> OsKind {
    match runner.run(host, "uname -s", timeout) {
        Ok(out) if out.succeeded() => {
            let kind = OsKind::from_uname(&out.stdout);
            debug!(host = %host.name, os = %kind, "detected remote os");
            kind
        }
        Ok(out) => {
            warn!(host = %host.name, status = ?out.status, "os detection failed; assuming posix df");
            OsKind::Unknown
        }
        Err(err) => {
            warn!(host = %host.name, %err, "os detection failed; assuming posix df");
            OsKind::Unknown
        }
    }
}

/// Sample usage of one partition.
///
/// `simulate_full` overrides a parsed percent with [`SIMULATED_PERCENT`]; an
/// unparsable percent stays unknown.
pub fn sample_partition(
    runner: &dyn RemoteRunner,
    host: &HostDescriptor,
    partition: &str,
    os_kind: OsKind,
    timeout: Duration,
    simulate_full: bool,
) -> Result<UsageSample> {
    let unavailable = |details: String| FdmError::SampleUnavailable {
        host: host.name.clone(),
        partition: partition.to_string(),
        details,
    };

    let querier = os_kind.querier();
    let out = runner
        .run(host, &querier.usage_command(partition), timeout)
        .map_err(|e| unavailable(e.to_string()))?;

    if !out.succeeded() && out.stdout.trim().is_empty() {
        return Err(unavailable(format!(
            "df exited with {:?}: {}",
            out.status,
            out.stderr.trim()
        )));
    }
    if out.stdout.trim().is_empty() {
        return Err(unavailable("empty df output".to_string()));
    }

    let row = querier
        .parse_usage(&out.stdout)
        .ok_or_else(|| unavailable(format!("unparsable {} df output", querier.name())))?;

    let used_percent = if simulate_full {
        row.used_percent.map(|_| SIMULATED_PERCENT)
    } else {
        row.used_percent
    };

    Ok(UsageSample {
        host: host.name.clone(),
        partition: partition.to_string(),
        filesystem: row.filesystem,
        size_bytes: row.size_kib.saturating_mul(1024),
        used_bytes: row.used_kib.saturating_mul(1024),
        avail_bytes: row.avail_kib.saturating_mul(1024),
        used_percent,
        inode_percent: row.inode_percent,
        mount_point: row.mount_point,
        os_kind,
    })
}

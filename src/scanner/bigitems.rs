//! Remote "largest directories/files" scans.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::errors::{FdmError, Result};
use crate::core::hosts::HostDescriptor;
use crate::monitor::usage::DiskUsageQuerier;
use crate::remote::ssh::RemoteRunner;
use crate::scanner::store::{BigItem, CacheEntry, ScanKind};

/// Parse `size path` lines, skipping anything else.
#[must_use]
pub fn parse_scan_output(output: &str, limit: usize) -> Vec<BigItem> {
    output
        .lines()
        .filter_map(BigItem::parse_line)
        .take(limit)
        .collect()
}

/// Run one scan and package the result as a fresh cache entry.
///
/// Empty output is a failure even with a zero exit status, since the
/// pipeline's status is that of its last stage.
#[allow(clippy::too_many_arguments)]
pub fn scan_partition(
    runner: &dyn RemoteRunner,
    querier: &dyn DiskUsageQuerier,
    host: &HostDescriptor,
    partition: &str,
    kind: ScanKind,
    limit: usize,
    timeout: Duration,
    captured_at: DateTime<Utc>,
) -> Result<CacheEntry> {
    let failure = |details: String| FdmError::ScanFailure {
        host: host.name.clone(),
        partition: partition.to_string(),
        kind: kind.label(),
        details,
    };

    let command = querier.scan_command(kind, partition, limit);
    let out = runner
        .run(host, &command, timeout)
        .map_err(|e| failure(e.to_string()))?;

    let items = parse_scan_output(&out.stdout, limit);
    if items.is_empty() {
        return Err(failure(format!(
            "no output (status {:?}): {}",
            out.status,
            out.stderr.trim()
        )));
    }
    debug!(host = %host.name, %partition, %kind, items = items.len(), "scan captured");

    Ok(CacheEntry {
        host: host.name.clone(),
        partition: partition.to_string(),
        kind,
        captured_at,
        items,
    })
}

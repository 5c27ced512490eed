//! Fleet-wide ranking of cached big items.
//!
//! For every configured, non-excluded host the cached entries of one kind are
//! flattened, size labels normalized to KiB, duplicates per `(host, path)`
//! collapsed, and the result ranked by size and truncated.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::hosts::HostDescriptor;
use crate::scanner::exclusion::ExclusionSet;
use crate::scanner::store::CacheStore;

/// Which row survives when one `(host, path)` is seen more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    FirstSeen,
    Largest,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeError {
    #[error("empty size label")]
    Empty,
    #[error("size label {0:?} has no numeric value")]
    NotANumber(String),
    #[error("size label {0:?} has an unrecognized unit")]
    UnknownUnit(String),
}

/// One ranked row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedRow {
    /// Size in KiB, the ordering key.
    pub sort_key: f64,
    pub display_size: String,
    pub path: String,
    pub host: String,
}

/// Normalize a `du -h`-style label to KiB.
///
/// A bare number is already KiB. Unit letters K/M/G/T/P are binary
/// multiples and may be followed by `B` or `iB`; a lone `B` means bytes.
/// A comma decimal separator is accepted.
pub fn normalize_size(label: &str) -> Result<f64, SizeError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(SizeError::Empty);
    }
    let split = label
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(label.len());
    let (number, unit) = label.split_at(split);
    let value: f64 = number
        .replace(',', ".")
        .parse()
        .map_err(|_| SizeError::NotANumber(label.to_string()))?;

    let unit = unit.trim();
    let unit_letter = unit
        .strip_suffix("iB")
        .or_else(|| unit.strip_suffix('B').filter(|u| !u.is_empty()))
        .unwrap_or(unit);
    let factor = match unit_letter.to_ascii_uppercase().as_str() {
        "" | "K" => 1.0,
        "B" => 1.0 / 1024.0,
        "M" => 1024.0,
        "G" => 1024.0 * 1024.0,
        "T" => 1024.0 * 1024.0 * 1024.0,
        "P" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(SizeError::UnknownUnit(label.to_string())),
    };
    Ok(value * factor)
}

/// Path identity for deduplication: trimmed, trailing slashes removed.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() && trimmed.starts_with('/') {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

/// Build the ranked top-`top_n` list for one store.
///
/// Hosts are visited in the given order; within a host, entries by partition
/// and items by their scan rank. That order defines "first seen" and breaks
/// ties between equal sizes.
#[must_use]
pub fn consolidate(
    hosts: &[HostDescriptor],
    exclusions: &ExclusionSet,
    store: &CacheStore,
    top_n: usize,
    policy: DedupPolicy,
) -> Vec<ConsolidatedRow> {
    let mut rows: Vec<ConsolidatedRow> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for host in hosts {
        if exclusions.is_excluded(&host.name) {
            continue;
        }
        for entry in store.entries_for_host(&host.name) {
            for item in &entry.items {
                let sort_key = match normalize_size(&item.size_label) {
                    Ok(kib) => kib,
                    Err(err) => {
                        warn!(host = %host.name, path = %item.path, %err, "size label skipped");
                        continue;
                    }
                };
                let path = normalize_path(&item.path);
                let row = ConsolidatedRow {
                    sort_key,
                    display_size: item.size_label.clone(),
                    path: path.clone(),
                    host: host.name.clone(),
                };
                match index.entry((host.name.clone(), path)) {
                    Entry::Vacant(slot) => {
                        slot.insert(rows.len());
                        rows.push(row);
                    }
                    Entry::Occupied(slot) => {
                        let existing = &mut rows[*slot.get()];
                        if policy == DedupPolicy::Largest && row.sort_key > existing.sort_key {
                            *existing = row;
                        }
                    }
                }
            }
        }
    }

    rows.sort_by(|a, b| b.sort_key.total_cmp(&a.sort_key));
    rows.truncate(top_n);
    rows
}

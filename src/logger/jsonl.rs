//! Append-only JSONL activity log.
//!
//! Each event is one JSON object per line. A log that cannot be opened or
//! written is reported through `tracing` and otherwise ignored; the sweep
//! never fails because of it.

#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::monitor::thresholds::Classification;
use crate::scanner::store::{MergeStats, ScanKind};

/// One line of the activity log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEvent {
    RunStarted {
        at: DateTime<Utc>,
        hosts: usize,
        workers: usize,
        sorted_only: bool,
    },
    HostCompleted {
        at: DateTime<Utc>,
        host: String,
        reachable: bool,
        /// Worst classification among the host's partitions.
        level: Option<Classification>,
        sample_errors: usize,
        scans: usize,
        scan_failures: usize,
        elapsed_ms: Option<u64>,
    },
    CacheMerged {
        at: DateTime<Utc>,
        kind: ScanKind,
        stats: MergeStats,
    },
    RunFinished {
        at: DateTime<Utc>,
        any_warning: bool,
        any_critical: bool,
        unreachable: usize,
        duration_ms: u64,
    },
}

/// Appends [`ActivityEvent`]s to a file, or nowhere.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    path: Option<PathBuf>,
}

impl ActivityLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Log that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { path: None }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&self, event: &ActivityEvent) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_line(path, event) {
            warn!(path = %path.display(), %err, "activity log append failed");
        }
    }
}

fn write_line(path: &Path, event: &ActivityEvent) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(event).map_err(std::io::Error::other)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished() -> ActivityEvent {
        ActivityEvent::RunFinished {
            at: Utc::now(),
            any_warning: true,
            any_critical: false,
            unreachable: 1,
            duration_ms: 1200,
        }
    }

    #[test]
    fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = ActivityLog::new(dir.path().join("logs").join("activity.jsonl"));
        log.append(&finished());
        log.append(&ActivityEvent::CacheMerged {
            at: Utc::now(),
            kind: ScanKind::Files,
            stats: MergeStats::default(),
        });

        let text = std::fs::read_to_string(log.path().expect("path")).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "run_finished");
        assert_eq!(lines[1]["kind"], "files");
    }

    #[test]
    fn unwritable_log_degrades_silently() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory where the file should be makes every append fail.
        let log = ActivityLog::new(dir.path());
        log.append(&finished());
        ActivityLog::disabled().append(&finished());
    }
}

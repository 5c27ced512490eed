//! Structured findings handed to the reporting collaborator.
//!
//! The core never renders; it emits [`ReportSection`] values in a stable
//! order and lets the sink decide on text, JSON, or mail bodies.

#![allow(missing_docs)]

use serde::Serialize;

use crate::monitor::thresholds::{Classification, Thresholds};
use crate::monitor::usage::{OsKind, UsageSample};
use crate::scanner::cache::{CacheState, ScanDecision};
use crate::scanner::consolidate::ConsolidatedRow;
use crate::scanner::store::{CacheEntry, MergeStats, ScanKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "section", rename_all = "snake_case")]
pub enum ReportSection {
    ConfigWarning {
        line_no: usize,
        message: String,
    },
    HostHeader {
        host: String,
        partitions: Vec<String>,
        os_kind: Option<OsKind>,
        excluded: bool,
    },
    /// Rendered critical-styled, but not a threshold alert.
    HostUnreachable {
        host: String,
        reason: String,
        code: String,
        error: String,
    },
    Usage {
        sample: UsageSample,
        thresholds: Thresholds,
        classification: Classification,
    },
    SampleError {
        host: String,
        partition: String,
        code: String,
        error: String,
    },
    BigItems {
        host: String,
        partition: String,
        kind: ScanKind,
        state: CacheState,
        decision: ScanDecision,
        entry: Option<CacheEntry>,
    },
    /// The previous entry, if any, was left untouched.
    ScanFailure {
        host: String,
        partition: String,
        kind: ScanKind,
        error: String,
    },
    HostElapsed {
        host: String,
        elapsed_ms: u64,
    },
    CacheMerged {
        kind: ScanKind,
        stats: MergeStats,
    },
    StoreError {
        kind: ScanKind,
        error: String,
    },
    SortedUsage {
        rows: Vec<UsageSample>,
    },
    Consolidated {
        kind: ScanKind,
        rows: Vec<ConsolidatedRow>,
    },
}

/// Receiver of report sections.
pub trait ReportSink {
    fn emit(&mut self, section: ReportSection);
}

/// Sink that keeps every section in order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub sections: Vec<ReportSection>,
}

impl ReportSink for CollectingSink {
    fn emit(&mut self, section: ReportSection) {
        self.sections.push(section);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_keeps_order() {
        let mut sink = CollectingSink::default();
        for host in ["a", "b"] {
            sink.emit(ReportSection::HostElapsed {
                host: host.to_string(),
                elapsed_ms: 3,
            });
        }
        assert!(matches!(
            &sink.sections[1],
            ReportSection::HostElapsed { host, .. } if host == "b"
        ));
    }

    #[test]
    fn sections_serialize_with_tag() {
        let section = ReportSection::HostUnreachable {
            host: "db01".to_string(),
            reason: "ping".to_string(),
            code: "FDM-2001".to_string(),
            error: "[FDM-2001] host db01 unreachable (ping)".to_string(),
        };
        let json = serde_json::to_value(&section).expect("serialize");
        assert_eq!(json["section"], "host_unreachable");
        assert_eq!(json["host"], "db01");
    }
}

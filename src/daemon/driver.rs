//! Scheduling driver: one sweep over the fleet.
//!
//! Per host, in name order: liveness, OS detection, per-partition sampling
//! and classification, then cache-gated big-item scans. Collection may run on
//! several worker threads; report emission, cache merging, and consolidation
//! always happen afterwards on the calling thread, in host order, with a
//! single write per store.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::{Config, MailConfig};
use crate::core::errors::FdmError;
use crate::core::hosts::{HostDescriptor, HostList};
use crate::logger::jsonl::{ActivityEvent, ActivityLog};
use crate::monitor::thresholds::{Classification, Thresholds};
use crate::monitor::usage::{OsKind, UsageSample, detect_os, sample_partition};
use crate::remote::probe::{LivenessProbe, check_host};
use crate::remote::ssh::RemoteRunner;
use crate::report::{ReportSection, ReportSink};
use crate::scanner::bigitems::scan_partition;
use crate::scanner::cache::{BigItemCache, CacheState, Clock, ScanDecision, decide};
use crate::scanner::consolidate::{ConsolidatedRow, consolidate};
use crate::scanner::exclusion::ExclusionSet;
use crate::scanner::store::{CacheEntry, MergeStats, ScanKind};

/// External collaborators the driver calls into.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub runner: &'a dyn RemoteRunner,
    pub probe: &'a dyn LivenessProbe,
    pub clock: &'a dyn Clock,
}

/// Sampling result of one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    pub thresholds: Thresholds,
    pub sample: Option<UsageSample>,
    pub classification: Option<Classification>,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
}

/// Cache decision and scan result for one partition and kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub partition: String,
    pub kind: ScanKind,
    pub state: CacheState,
    pub decision: ScanDecision,
    /// Fresh entry captured this run, staged until the end-of-run merge.
    pub captured: Option<CacheEntry>,
    pub error: Option<String>,
}

/// Everything collected for one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostOutcome {
    pub host: HostDescriptor,
    pub excluded: bool,
    /// `Some(reason)` when the host failed its liveness check.
    pub unreachable: Option<String>,
    pub os_kind: Option<OsKind>,
    pub partitions: Vec<PartitionReport>,
    pub scans: Vec<ScanReport>,
    pub elapsed: Option<Duration>,
}

impl HostOutcome {
    /// Worst classification across partitions.
    #[must_use]
    pub fn level(&self) -> Option<Classification> {
        self.partitions.iter().filter_map(|p| p.classification).max()
    }

    #[must_use]
    pub fn sample_errors(&self) -> usize {
        self.partitions.iter().filter(|p| p.error.is_some()).count()
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub hosts: Vec<HostOutcome>,
    pub any_warning: bool,
    pub any_critical: bool,
    pub unreachable: Vec<String>,
    /// Filled only in sorted-usage mode.
    pub sorted_usage: Vec<UsageSample>,
    pub merges: BTreeMap<ScanKind, MergeStats>,
    pub consolidated: BTreeMap<ScanKind, Vec<ConsolidatedRow>>,
    pub store_errors: Vec<String>,
}

impl RunSummary {
    /// Recipients for this run's report: `always`, then `on_warning` when
    /// anything is at warning or above, then `on_critical`. Duplicates are
    /// dropped, first position kept.
    #[must_use]
    pub fn recipients(&self, mail: &MailConfig) -> Vec<String> {
        let mut lists: Vec<&[String]> = vec![&mail.always];
        if self.any_warning || self.any_critical {
            lists.push(&mail.on_warning);
        }
        if self.any_critical {
            lists.push(&mail.on_critical);
        }
        let mut out: Vec<String> = Vec::new();
        for addr in lists.into_iter().flatten() {
            if !out.contains(addr) {
                out.push(addr.clone());
            }
        }
        out
    }
}

/// Sequences collection, reporting, cache merge, and consolidation.
pub struct Driver<'a> {
    config: &'a Config,
    exclusions: &'a ExclusionSet,
    collaborators: Collaborators<'a>,
    activity: &'a ActivityLog,
}

impl<'a> Driver<'a> {
    #[must_use]
    pub const fn new(
        config: &'a Config,
        exclusions: &'a ExclusionSet,
        collaborators: Collaborators<'a>,
        activity: &'a ActivityLog,
    ) -> Self {
        Self {
            config,
            exclusions,
            collaborators,
            activity,
        }
    }

    /// Run one sweep. Per-host and per-partition failures become report
    /// sections; nothing here aborts the run.
    pub fn run(
        &self,
        hosts: &HostList,
        cache: &mut BigItemCache,
        sink: &mut dyn ReportSink,
    ) -> RunSummary {
        let started = Instant::now();
        let now = self.collaborators.clock.now();
        let run = &self.config.run;

        let mut ordered: Vec<HostDescriptor> = hosts.hosts.clone();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        for warning in &hosts.warnings {
            sink.emit(ReportSection::ConfigWarning {
                line_no: warning.line_no,
                message: warning.message.clone(),
            });
        }
        self.activity.append(&ActivityEvent::RunStarted {
            at: now,
            hosts: ordered.len(),
            workers: run.workers,
            sorted_only: run.sorted_only,
        });
        info!(hosts = ordered.len(), workers = run.workers, "sweep started");

        let outcomes = self.collect_all(&ordered, cache, now);

        let mut summary = RunSummary {
            started_at: Some(now),
            ..RunSummary::default()
        };
        for outcome in &outcomes {
            for classification in outcome.partitions.iter().filter_map(|p| p.classification) {
                match classification {
                    Classification::Critical => summary.any_critical = true,
                    Classification::Warning => summary.any_warning = true,
                    Classification::Normal => {}
                }
            }
            if outcome.unreachable.is_some() {
                summary.unreachable.push(outcome.host.name.clone());
            }
            self.log_host(outcome);
        }

        if run.sorted_only {
            summary.sorted_usage = sorted_usage(&outcomes);
            sink.emit(ReportSection::SortedUsage {
                rows: summary.sorted_usage.clone(),
            });
        } else {
            for outcome in &outcomes {
                emit_host(outcome, cache, sink);
            }
            self.merge_scans(&outcomes, cache, sink, &mut summary);
            if run.consolidated {
                summary.consolidated = consolidate_all(self.config, &ordered, self.exclusions, cache);
                for (kind, rows) in &summary.consolidated {
                    sink.emit(ReportSection::Consolidated {
                        kind: *kind,
                        rows: rows.clone(),
                    });
                }
            }
        }

        let duration_ms = millis(started.elapsed());
        self.activity.append(&ActivityEvent::RunFinished {
            at: self.collaborators.clock.now(),
            any_warning: summary.any_warning,
            any_critical: summary.any_critical,
            unreachable: summary.unreachable.len(),
            duration_ms,
        });
        info!(
            duration_ms,
            any_warning = summary.any_warning,
            any_critical = summary.any_critical,
            "sweep finished"
        );

        summary.hosts = outcomes;
        summary
    }

    fn collect_all(
        &self,
        hosts: &[HostDescriptor],
        cache: &BigItemCache,
        now: DateTime<Utc>,
    ) -> Vec<HostOutcome> {
        let workers = self.config.run.workers.clamp(1, hosts.len().max(1));
        if workers == 1 {
            return hosts
                .iter()
                .map(|host| self.collect_host(host, cache, now))
                .collect();
        }

        let slots: Mutex<Vec<Option<HostOutcome>>> = Mutex::new(vec![None; hosts.len()]);
        let (tx, rx) = unbounded::<(usize, &HostDescriptor)>();
        for job in hosts.iter().enumerate() {
            let _ = tx.send(job);
        }
        drop(tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let slots = &slots;
                scope.spawn(move || {
                    for (idx, host) in rx {
                        let outcome = self.collect_host(host, cache, now);
                        slots.lock()[idx] = Some(outcome);
                    }
                });
            }
        });

        slots.into_inner().into_iter().flatten().collect()
    }

    fn collect_host(
        &self,
        host: &HostDescriptor,
        cache: &BigItemCache,
        now: DateTime<Utc>,
    ) -> HostOutcome {
        let started = Instant::now();
        let remote = &self.config.remote;
        let Collaborators { runner, probe, .. } = self.collaborators;

        let mut outcome = HostOutcome {
            host: host.clone(),
            excluded: self.exclusions.is_excluded(&host.name),
            unreachable: None,
            os_kind: None,
            partitions: Vec::new(),
            scans: Vec::new(),
            elapsed: None,
        };

        if let Err(reason) = check_host(host, probe, runner, remote) {
            info!(host = %host.name, reason = reason.as_str(), "host unreachable");
            outcome.unreachable = Some(reason.as_str().to_string());
            outcome.elapsed = self.elapsed_since(started);
            return outcome;
        }

        let os_kind = detect_os(runner, host, remote.command_timeout());
        outcome.os_kind = Some(os_kind);

        let thresholds = Thresholds::resolve(host, &self.config.thresholds);
        outcome.partitions = host
            .partitions
            .iter()
            .map(|partition| self.sample_one(host, partition, os_kind, thresholds))
            .collect();

        if !self.config.run.sorted_only {
            outcome.scans =
                self.scan_host(host, outcome.excluded, os_kind, &outcome.partitions, cache, now);
        }

        outcome.elapsed = self.elapsed_since(started);
        outcome
    }

    fn sample_one(
        &self,
        host: &HostDescriptor,
        partition: &str,
        os_kind: OsKind,
        thresholds: Thresholds,
    ) -> PartitionReport {
        let mut report = PartitionReport {
            partition: partition.to_string(),
            thresholds,
            sample: None,
            classification: None,
            error: None,
            error_code: None,
        };
        let sampled = sample_partition(
            self.collaborators.runner,
            host,
            partition,
            os_kind,
            self.config.remote.command_timeout(),
            self.config.run.simulate_full,
        );
        match sampled {
            Ok(sample) => {
                match thresholds.evaluate(&sample) {
                    Ok(classification) => report.classification = Some(classification),
                    Err(err) => {
                        report.error_code = Some(err.code());
                        report.error = Some(err.to_string());
                    }
                }
                report.sample = Some(sample);
            }
            Err(err) => {
                warn!(host = %host.name, %partition, %err, "usage sample unavailable");
                report.error_code = Some(err.code());
                report.error = Some(err.to_string());
            }
        }
        report
    }

    fn scan_host(
        &self,
        host: &HostDescriptor,
        excluded: bool,
        os_kind: OsKind,
        partitions: &[PartitionReport],
        cache: &BigItemCache,
        now: DateTime<Utc>,
    ) -> Vec<ScanReport> {
        let scan = &self.config.scan;
        let mut reports = Vec::new();
        for &kind in &scan.kinds {
            for partition in partitions {
                let state = cache.state(&host.name, &partition.partition, kind, now);
                let decision = decide(state, excluded, scan.enabled);
                let mut report = ScanReport {
                    partition: partition.partition.clone(),
                    kind,
                    state,
                    decision,
                    captured: None,
                    error: None,
                };
                if decision == ScanDecision::Scan {
                    if partition.sample.is_none() {
                        report.error = Some("skipped: usage sample unavailable".to_string());
                    } else {
                        debug!(host = %host.name, partition = %partition.partition, %kind, ?state, "scanning");
                        match scan_partition(
                            self.collaborators.runner,
                            os_kind.querier(),
                            host,
                            &partition.partition,
                            kind,
                            scan.items_per_scan,
                            self.config.remote.scan_timeout(),
                            now,
                        ) {
                            Ok(entry) => report.captured = Some(entry),
                            Err(err) => {
                                warn!(%err, "scan failed; keeping cached entry");
                                report.error = Some(err.to_string());
                            }
                        }
                    }
                }
                reports.push(report);
            }
        }
        reports
    }

    fn merge_scans(
        &self,
        outcomes: &[HostOutcome],
        cache: &mut BigItemCache,
        sink: &mut dyn ReportSink,
        summary: &mut RunSummary,
    ) {
        for &kind in &self.config.scan.kinds {
            let fresh: Vec<CacheEntry> = outcomes
                .iter()
                .flat_map(|o| o.scans.iter())
                .filter(|s| s.kind == kind)
                .filter_map(|s| s.captured.clone())
                .collect();
            if fresh.is_empty() {
                continue;
            }
            match cache.persist_merge(kind, fresh) {
                Ok(stats) => {
                    summary.merges.insert(kind, stats);
                    sink.emit(ReportSection::CacheMerged { kind, stats });
                    self.activity.append(&ActivityEvent::CacheMerged {
                        at: self.collaborators.clock.now(),
                        kind,
                        stats,
                    });
                }
                Err(err) => {
                    warn!(%kind, %err, "cache store write failed");
                    summary.store_errors.push(err.to_string());
                    sink.emit(ReportSection::StoreError {
                        kind,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    fn log_host(&self, outcome: &HostOutcome) {
        self.activity.append(&ActivityEvent::HostCompleted {
            at: self.collaborators.clock.now(),
            host: outcome.host.name.clone(),
            reachable: outcome.unreachable.is_none(),
            level: outcome.level(),
            sample_errors: outcome.sample_errors(),
            scans: outcome
                .scans
                .iter()
                .filter(|s| s.decision == ScanDecision::Scan)
                .count(),
            scan_failures: outcome.scans.iter().filter(|s| s.error.is_some()).count(),
            elapsed_ms: outcome.elapsed.map(millis),
        });
    }

    fn elapsed_since(&self, started: Instant) -> Option<Duration> {
        self.config.run.record_elapsed.then(|| started.elapsed())
    }
}

fn emit_host(outcome: &HostOutcome, cache: &BigItemCache, sink: &mut dyn ReportSink) {
    let host = &outcome.host.name;
    sink.emit(ReportSection::HostHeader {
        host: host.clone(),
        partitions: outcome.host.partitions.clone(),
        os_kind: outcome.os_kind,
        excluded: outcome.excluded,
    });

    if let Some(reason) = &outcome.unreachable {
        let err = FdmError::Unreachable {
            host: host.clone(),
            reason: reason.clone(),
        };
        sink.emit(ReportSection::HostUnreachable {
            host: host.clone(),
            reason: reason.clone(),
            code: err.code().to_string(),
            error: err.to_string(),
        });
    } else {
        for part in &outcome.partitions {
            match (&part.sample, part.classification) {
                (Some(sample), Some(classification)) => sink.emit(ReportSection::Usage {
                    sample: sample.clone(),
                    thresholds: part.thresholds,
                    classification,
                }),
                _ => sink.emit(ReportSection::SampleError {
                    host: host.clone(),
                    partition: part.partition.clone(),
                    code: part.error_code.unwrap_or("FDM-2002").to_string(),
                    error: part.error.clone().unwrap_or_default(),
                }),
            }
        }

        for scan in outcome
            .scans
            .iter()
            .filter(|s| s.decision != ScanDecision::Excluded)
        {
            if let Some(error) = &scan.error {
                sink.emit(ReportSection::ScanFailure {
                    host: host.clone(),
                    partition: scan.partition.clone(),
                    kind: scan.kind,
                    error: error.clone(),
                });
            }
            let entry = scan
                .captured
                .clone()
                .or_else(|| cache.entry(host, &scan.partition, scan.kind).cloned());
            sink.emit(ReportSection::BigItems {
                host: host.clone(),
                partition: scan.partition.clone(),
                kind: scan.kind,
                state: scan.state,
                decision: scan.decision,
                entry,
            });
        }
    }

    if let Some(elapsed) = outcome.elapsed {
        sink.emit(ReportSection::HostElapsed {
            host: host.clone(),
            elapsed_ms: millis(elapsed),
        });
    }
}

/// All known-percent samples, fullest first; ties by host then partition.
#[must_use]
pub fn sorted_usage(outcomes: &[HostOutcome]) -> Vec<UsageSample> {
    let mut rows: Vec<UsageSample> = outcomes
        .iter()
        .flat_map(|o| o.partitions.iter())
        .filter_map(|p| p.sample.clone())
        .filter(|s| s.used_percent.is_some())
        .collect();
    rows.sort_by(|a, b| {
        b.used_percent
            .cmp(&a.used_percent)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.partition.cmp(&b.partition))
    });
    rows
}

/// Consolidated ranking per configured scan kind, from the cache alone.
#[must_use]
pub fn consolidate_all(
    config: &Config,
    hosts: &[HostDescriptor],
    exclusions: &ExclusionSet,
    cache: &BigItemCache,
) -> BTreeMap<ScanKind, Vec<ConsolidatedRow>> {
    config
        .scan
        .kinds
        .iter()
        .filter_map(|&kind| {
            let store = cache.store(kind)?;
            let rows = consolidate(
                hosts,
                exclusions,
                store,
                config.scan.consolidated_top,
                config.scan.dedup_policy,
            );
            Some((kind, rows))
        })
        .collect()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

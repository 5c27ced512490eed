//! End-to-end sweeps against a scripted fleet.

mod common;

use std::path::Path;

use common::{FakeFleet, FakeHost, days_ago, now};
use fleet_disk_monitor::core::config::Config;
use fleet_disk_monitor::core::hosts::parse_host_list;
use fleet_disk_monitor::daemon::driver::{Collaborators, Driver, RunSummary};
use fleet_disk_monitor::logger::jsonl::ActivityLog;
use fleet_disk_monitor::monitor::thresholds::Classification;
use fleet_disk_monitor::report::{CollectingSink, ReportSection};
use fleet_disk_monitor::scanner::cache::{BigItemCache, CacheState, FixedClock, ScanDecision};
use fleet_disk_monitor::scanner::exclusion::ExclusionSet;
use fleet_disk_monitor::scanner::store::{BigItem, CacheEntry, CacheStore, ScanKind};

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.paths.cache_dir = dir.join("cache");
    config.paths.activity_log = dir.join("activity.jsonl");
    config.run.record_elapsed = false;
    config
}

fn sweep(
    config: &Config,
    hosts_text: &str,
    exclusions: &ExclusionSet,
    fleet: &FakeFleet,
) -> (RunSummary, Vec<ReportSection>) {
    let hosts = parse_host_list(hosts_text);
    let mut cache = BigItemCache::open(
        &config.paths.cache_dir,
        &config.scan.kinds,
        config.scan.staleness_window(),
    )
    .expect("open cache");
    let clock = FixedClock(now());
    let activity = ActivityLog::new(config.paths.activity_log.clone());
    let driver = Driver::new(
        config,
        exclusions,
        Collaborators {
            runner: fleet,
            probe: fleet,
            clock: &clock,
        },
        &activity,
    );
    let mut sink = CollectingSink::default();
    let summary = driver.run(&hosts, &mut cache, &mut sink);
    (summary, sink.sections)
}

fn cached(host: &str, partition: &str, at_days_ago: i64, items: &[(&str, &str)]) -> CacheEntry {
    CacheEntry {
        host: host.to_string(),
        partition: partition.to_string(),
        kind: ScanKind::Directories,
        captured_at: days_ago(at_days_ago),
        items: items.iter().map(|(s, p)| BigItem::new(*s, *p)).collect(),
    }
}

fn seed_dirs(config: &Config, entries: Vec<CacheEntry>) {
    let mut store = CacheStore::new(ScanKind::Directories);
    store.merge(entries);
    store
        .save(&config.paths.cache_dir.join(ScanKind::Directories.file_name()))
        .expect("seed store");
}

fn stored_dirs(config: &Config) -> CacheStore {
    CacheStore::load(
        &config.paths.cache_dir.join(ScanKind::Directories.file_name()),
        ScanKind::Directories,
    )
    .expect("load store")
}

fn classification_of(sections: &[ReportSection], host: &str, partition: &str) -> Option<Classification> {
    sections.iter().find_map(|s| match s {
        ReportSection::Usage {
            sample,
            classification,
            ..
        } if sample.host == host && sample.partition == partition => Some(*classification),
        _ => None,
    })
}

fn big_items<'a>(
    sections: &'a [ReportSection],
    host: &str,
    partition: &str,
) -> Option<(CacheState, ScanDecision, Option<&'a CacheEntry>)> {
    sections.iter().find_map(|s| match s {
        ReportSection::BigItems {
            host: h,
            partition: p,
            kind: ScanKind::Directories,
            state,
            decision,
            entry,
        } if h == host && p == partition => Some((*state, *decision, entry.as_ref())),
        _ => None,
    })
}

#[test]
fn per_host_thresholds_drive_classification() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new()
        .host(
            "dbserver-prod01",
            FakeHost::default()
                .with_usage("/var", "50%")
                .with_usage("/data", "91%"),
        )
        .host("web01", FakeHost::default().with_usage("/", "72%"))
        .host("web02", FakeHost::default().with_usage("/", "72%"));

    let (summary, sections) = sweep(
        &config,
        "dbserver-prod01:/var,/data:65:90\nweb01::70\nweb02\n",
        &ExclusionSet::default(),
        &fleet,
    );

    assert_eq!(
        classification_of(&sections, "dbserver-prod01", "/var"),
        Some(Classification::Normal)
    );
    assert_eq!(
        classification_of(&sections, "dbserver-prod01", "/data"),
        Some(Classification::Critical)
    );
    assert_eq!(
        classification_of(&sections, "web01", "/"),
        Some(Classification::Warning)
    );
    assert_eq!(
        classification_of(&sections, "web02", "/"),
        Some(Classification::Normal)
    );
    assert!(summary.any_critical);
    assert!(summary.any_warning);
    assert!(summary.unreachable.is_empty());
}

#[test]
fn one_host_can_raise_both_alert_flags() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new().host(
        "db01",
        FakeHost::default()
            .with_usage("/var", "80%")
            .with_usage("/data", "95%"),
    );

    let (summary, sections) = sweep(&config, "db01:/var,/data\n", &ExclusionSet::default(), &fleet);

    assert_eq!(
        classification_of(&sections, "db01", "/var"),
        Some(Classification::Warning)
    );
    assert_eq!(
        classification_of(&sections, "db01", "/data"),
        Some(Classification::Critical)
    );
    assert!(summary.any_warning, "warning partition on a critical host still counts");
    assert!(summary.any_critical);

    let log = std::fs::read_to_string(&config.paths.activity_log).expect("activity log");
    let finished: serde_json::Value = log
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|e| e["event"] == "run_finished")
        .expect("run_finished event");
    assert_eq!(finished["any_warning"], true);
    assert_eq!(finished["any_critical"], true);
}

#[test]
fn hosts_are_reported_in_name_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new()
        .host("zeta", FakeHost::default().with_usage("/", "10%"))
        .host("alpha", FakeHost::default().with_usage("/", "10%"));

    let (_, sections) = sweep(&config, "zeta\nalpha\n", &ExclusionSet::default(), &fleet);
    let headers: Vec<&str> = sections
        .iter()
        .filter_map(|s| match s {
            ReportSection::HostHeader { host, .. } => Some(host.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(headers, vec!["alpha", "zeta"]);
}

#[test]
fn excluded_host_is_never_scanned_or_consolidated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.scan.kinds = vec![ScanKind::Directories];
    seed_dirs(
        &config,
        vec![
            cached("web01", "/", 30, &[("900G", "/huge")]),
            cached("db01", "/", 1, &[("3G", "/var/lib/pg")]),
        ],
    );
    let fleet = FakeFleet::new()
        .host("db01", FakeHost::default().with_usage("/", "40%"))
        .host("web01", FakeHost::default().with_usage("/", "80%"));

    let (summary, sections) = sweep(
        &config,
        "db01\nweb01\n",
        &ExclusionSet::new(["web01"]),
        &fleet,
    );

    assert_eq!(fleet.scans_on("web01"), 0);
    assert_eq!(
        classification_of(&sections, "web01", "/"),
        Some(Classification::Warning),
        "usage is still sampled for excluded hosts"
    );
    assert!(big_items(&sections, "web01", "/").is_none());
    let web01 = summary
        .hosts
        .iter()
        .find(|o| o.host.name == "web01")
        .expect("web01 outcome");
    assert!(!web01.scans.is_empty());
    assert!(
        web01
            .scans
            .iter()
            .all(|s| s.decision == ScanDecision::Excluded && s.captured.is_none())
    );

    let rows = &summary.consolidated[&ScanKind::Directories];
    assert!(rows.iter().all(|r| r.host != "web01"));
    assert_eq!(rows[0].path, "/var/lib/pg");

    let stored = stored_dirs(&config);
    let kept = stored.get("web01", "/").expect("excluded entry preserved");
    assert_eq!(kept.captured_at, days_ago(30));
}

#[test]
fn stale_entries_are_rescanned_fresh_ones_served() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.scan.kinds = vec![ScanKind::Directories];
    seed_dirs(
        &config,
        vec![
            cached("old", "/", 8, &[("1G", "/before")]),
            cached("recent", "/", 6, &[("2G", "/kept")]),
        ],
    );
    let fleet = FakeFleet::new()
        .host("old", FakeHost::default().with_usage("/", "10%"))
        .host("recent", FakeHost::default().with_usage("/", "10%"));

    let (summary, sections) = sweep(&config, "old\nrecent\n", &ExclusionSet::default(), &fleet);

    assert_eq!(fleet.scans_on("old"), 1);
    assert_eq!(fleet.scans_on("recent"), 0);

    let (state, decision, entry) = big_items(&sections, "old", "/").expect("old section");
    assert_eq!((state, decision), (CacheState::Stale, ScanDecision::Scan));
    assert_eq!(entry.expect("fresh entry").captured_at, now());

    let (state, decision, entry) = big_items(&sections, "recent", "/").expect("recent section");
    assert_eq!((state, decision), (CacheState::Fresh, ScanDecision::ServeCached));
    assert_eq!(entry.expect("cached entry").captured_at, days_ago(6));

    let stats = summary.merges[&ScanKind::Directories];
    assert_eq!((stats.inserted, stats.replaced), (0, 1));

    let stored = stored_dirs(&config);
    assert_eq!(stored.get("old", "/").expect("old").captured_at, now());
    assert_eq!(stored.get("old", "/").expect("old").items[0].path, "/srv/a");
    assert_eq!(stored.get("recent", "/").expect("recent").captured_at, days_ago(6));
}

#[test]
fn disabled_scanning_serves_stale_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.scan.kinds = vec![ScanKind::Directories];
    config.scan.enabled = false;
    seed_dirs(&config, vec![cached("old", "/", 20, &[("1G", "/before")])]);
    let fleet = FakeFleet::new().host("old", FakeHost::default().with_usage("/", "10%"));

    let (summary, sections) = sweep(&config, "old\n", &ExclusionSet::default(), &fleet);

    assert_eq!(fleet.scans_on("old"), 0);
    let (state, decision, entry) = big_items(&sections, "old", "/").expect("section");
    assert_eq!((state, decision), (CacheState::Stale, ScanDecision::ServeCached));
    assert_eq!(entry.expect("entry").items[0].path, "/before");
    assert!(summary.merges.is_empty());
}

#[test]
fn unreachable_host_is_reported_without_alerting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new()
        .host("down", FakeHost::default().with_usage("/", "99%").unreachable())
        .host("up", FakeHost::default().with_usage("/", "10%"));

    let (summary, sections) = sweep(&config, "down\nup\n", &ExclusionSet::default(), &fleet);

    assert_eq!(summary.unreachable, vec!["down".to_string()]);
    assert!(!summary.any_warning);
    assert!(!summary.any_critical);
    assert!(sections.iter().any(|s| matches!(
        s,
        ReportSection::HostUnreachable { host, reason, code, .. }
            if host == "down" && reason == "ping" && code == "FDM-2001"
    )));
    assert!(fleet.calls().iter().all(|(host, _)| host != "down"));
    assert_eq!(
        classification_of(&sections, "up", "/"),
        Some(Classification::Normal)
    );
}

#[test]
fn failed_scan_keeps_previous_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.scan.kinds = vec![ScanKind::Directories];
    seed_dirs(&config, vec![cached("a", "/", 10, &[("5G", "/old")])]);
    let fleet = FakeFleet::new().host("a", FakeHost::default().with_usage("/", "10%").failing_scans());

    let (summary, sections) = sweep(&config, "a\n", &ExclusionSet::default(), &fleet);

    assert!(sections.iter().any(|s| matches!(
        s,
        ReportSection::ScanFailure { host, .. } if host == "a"
    )));
    let (_, decision, entry) = big_items(&sections, "a", "/").expect("section");
    assert_eq!(decision, ScanDecision::Scan);
    assert_eq!(entry.expect("previous entry").captured_at, days_ago(10));
    assert!(summary.merges.is_empty());
    assert_eq!(
        stored_dirs(&config).get("a", "/").expect("kept").captured_at,
        days_ago(10)
    );
}

#[test]
fn missing_usage_sample_skips_that_partitions_scans() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new().host("a", FakeHost::default().with_usage("/", "10%"));

    let (summary, sections) = sweep(&config, "a:/,/gone\n", &ExclusionSet::default(), &fleet);

    assert!(sections.iter().any(|s| matches!(
        s,
        ReportSection::SampleError { partition, code, .. } if partition == "/gone" && code == "FDM-2002"
    )));
    assert!(sections.iter().any(|s| matches!(
        s,
        ReportSection::ScanFailure { partition, error, .. }
            if partition == "/gone" && error.contains("usage sample unavailable")
    )));
    // One directory scan and one file scan, both for "/".
    assert_eq!(fleet.scans_on("a"), 2);
    assert!(!summary.any_warning && !summary.any_critical);
}

#[test]
fn unknown_percent_is_an_error_not_an_alert() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new().host("a", FakeHost::default().with_usage("/", "-"));

    let (summary, sections) = sweep(&config, "a\n", &ExclusionSet::default(), &fleet);

    assert!(sections.iter().any(|s| matches!(
        s,
        ReportSection::SampleError { code, .. } if code == "FDM-2003"
    )));
    assert_eq!(classification_of(&sections, "a", "/"), None);
    assert!(!summary.any_warning && !summary.any_critical);
}

#[test]
fn simulate_full_forces_critical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.run.simulate_full = true;
    let fleet = FakeFleet::new().host("a", FakeHost::default().with_usage("/", "12%"));

    let (summary, sections) = sweep(&config, "a\n", &ExclusionSet::default(), &fleet);

    assert_eq!(
        classification_of(&sections, "a", "/"),
        Some(Classification::Critical)
    );
    assert!(summary.any_critical);
}

#[test]
fn sorted_mode_lists_usage_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_in(dir.path());
    config.run.sorted_only = true;
    let fleet = FakeFleet::new()
        .host(
            "a",
            FakeHost::default()
                .with_usage("/", "40%")
                .with_usage("/x", "95%"),
        )
        .host("b", FakeHost::default().with_usage("/", "60%"));

    let (summary, sections) = sweep(&config, "a:/,/x\nb\n", &ExclusionSet::default(), &fleet);

    assert_eq!(sections.len(), 1);
    let ReportSection::SortedUsage { rows } = &sections[0] else {
        panic!("expected sorted usage, got {:?}", sections[0]);
    };
    let order: Vec<(&str, &str, Option<u8>)> = rows
        .iter()
        .map(|s| (s.host.as_str(), s.partition.as_str(), s.used_percent))
        .collect();
    assert_eq!(
        order,
        vec![("a", "/x", Some(95)), ("b", "/", Some(60)), ("a", "/", Some(40))]
    );
    assert!(summary.any_critical);
    assert_eq!(fleet.scans_on("a") + fleet.scans_on("b"), 0);
    assert!(!config.paths.cache_dir.join("bigdirs.cache").exists());
}

#[test]
fn parallel_collection_matches_sequential() {
    let hosts_text = "h1:/,/data\nh2\nh3::50:60\nh4\nh5\nh6\n";
    let fleet = || {
        let mut fleet = FakeFleet::new();
        for (i, name) in ["h1", "h2", "h3", "h4", "h5", "h6"].iter().enumerate() {
            let pct = format!("{}%", 15 * i + 10);
            let mut host = FakeHost::default().with_usage("/", &pct).with_usage("/data", "77%");
            if *name == "h5" {
                host = host.unreachable();
            }
            fleet = fleet.host(name, host);
        }
        fleet
    };

    let seq_dir = tempfile::tempdir().expect("tempdir");
    let seq_config = config_in(seq_dir.path());
    let (seq_summary, seq_sections) =
        sweep(&seq_config, hosts_text, &ExclusionSet::new(["h2"]), &fleet());

    let par_dir = tempfile::tempdir().expect("tempdir");
    let mut par_config = config_in(par_dir.path());
    par_config.run.workers = 4;
    let (par_summary, par_sections) =
        sweep(&par_config, hosts_text, &ExclusionSet::new(["h2"]), &fleet());

    assert_eq!(seq_sections, par_sections);
    assert_eq!(seq_summary.any_critical, par_summary.any_critical);
    assert_eq!(seq_summary.unreachable, par_summary.unreachable);
    assert_eq!(
        std::fs::read_to_string(seq_config.paths.cache_dir.join("bigdirs.cache")).expect("seq"),
        std::fs::read_to_string(par_config.paths.cache_dir.join("bigdirs.cache")).expect("par"),
    );
}

#[test]
fn activity_log_records_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new()
        .host("a", FakeHost::default().with_usage("/", "91%"))
        .host("b", FakeHost::default().unreachable());

    let _ = sweep(&config, "a\nb\n", &ExclusionSet::default(), &fleet);

    let text = std::fs::read_to_string(&config.paths.activity_log).expect("activity log");
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap_or("")).collect();
    assert_eq!(kinds.first(), Some(&"run_started"));
    assert_eq!(kinds.last(), Some(&"run_finished"));
    assert_eq!(kinds.iter().filter(|k| **k == "host_completed").count(), 2);

    let a = events
        .iter()
        .find(|e| e["event"] == "host_completed" && e["host"] == "a")
        .expect("host a event");
    assert_eq!(a["level"], "critical");
    assert_eq!(events.last().expect("last")["any_critical"], true);
}

#[test]
fn config_warnings_lead_the_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());
    let fleet = FakeFleet::new().host("a", FakeHost::default().with_usage("/", "10%"));

    let (_, sections) = sweep(&config, "a:/:95:80\n", &ExclusionSet::default(), &fleet);

    assert!(matches!(&sections[0], ReportSection::ConfigWarning { line_no: 1, .. }));
    // Critical is checked first, so 10% is still normal under the inverted pair.
    assert_eq!(
        classification_of(&sections, "a", "/"),
        Some(Classification::Normal)
    );
}

//! Shared harness for integration tests: a scripted fleet standing in for
//! ssh/ping, and a runner for the `fdm` binary that keeps a per-case log.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use fleet_disk_monitor::core::errors::Result;
use fleet_disk_monitor::core::hosts::HostDescriptor;
use fleet_disk_monitor::remote::exec::CommandOutput;
use fleet_disk_monitor::remote::probe::LivenessProbe;
use fleet_disk_monitor::remote::ssh::RemoteRunner;

/// Behaviour of one scripted host.
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub reachable: bool,
    pub uname: String,
    /// Partition to capacity column (`"91%"`, or `"-"` for unknown).
    pub usage: BTreeMap<String, String>,
    pub dirs: String,
    pub files: String,
    pub scans_fail: bool,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            reachable: true,
            uname: "Linux".to_string(),
            usage: BTreeMap::new(),
            dirs: "2.0G /srv/a\n1.5G /srv/b\n".to_string(),
            files: "700M /srv/a/dump.sql\n".to_string(),
            scans_fail: false,
        }
    }
}

impl FakeHost {
    pub fn with_usage(mut self, partition: &str, capacity: &str) -> Self {
        self.usage.insert(partition.to_string(), capacity.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn failing_scans(mut self) -> Self {
        self.scans_fail = true;
        self
    }
}

/// Answers ssh commands and pings for a set of [`FakeHost`]s and records
/// every remote command it receives.
#[derive(Debug, Default)]
pub struct FakeFleet {
    hosts: BTreeMap<String, FakeHost>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, name: &str, host: FakeHost) -> Self {
        self.hosts.insert(name.to_string(), host);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    /// Big-item scan commands issued against `host`.
    pub fn scans_on(&self, host: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(h, c)| h == host && c.contains("sort -rh"))
            .count()
    }

    fn df_output(partition: &str, capacity: &str) -> String {
        let used = capacity
            .trim_end_matches('%')
            .parse::<u64>()
            .map_or(0, |pct| pct * 10_000);
        format!(
            "Filesystem     1024-blocks    Used Available Capacity Mounted on\n\
             /dev/fake        1000000 {used:>7} {avail:>9} {capacity:>8} {partition}\n",
            avail = 1_000_000 - used,
        )
    }
}

/// Partition argument of a generated command: the first single-quoted word.
fn quoted_arg(command: &str) -> Option<&str> {
    command.split('\'').nth(1)
}

impl RemoteRunner for FakeFleet {
    fn run(&self, host: &HostDescriptor, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.calls
            .lock()
            .push((host.name.clone(), command.to_string()));

        let Some(fake) = self.hosts.get(&host.name) else {
            return Ok(CommandOutput::failure(255, "ssh: Could not resolve hostname"));
        };
        if !fake.reachable {
            return Ok(CommandOutput::failure(255, "ssh: connect to host: No route to host"));
        }
        if command == "true" {
            return Ok(CommandOutput::success(""));
        }
        if command == "uname -s" {
            return Ok(CommandOutput::success(format!("{}\n", fake.uname)));
        }
        if command.contains("sort -rh") {
            if fake.scans_fail {
                return Ok(CommandOutput::failure(1, "du: cannot read directory: Permission denied"));
            }
            let body = if command.starts_with("du") {
                &fake.dirs
            } else {
                &fake.files
            };
            return Ok(CommandOutput::success(body.clone()));
        }
        if command.contains("df") {
            let partition = quoted_arg(command).unwrap_or_default();
            return Ok(match fake.usage.get(partition) {
                Some(capacity) => CommandOutput::success(Self::df_output(partition, capacity)),
                None => CommandOutput::failure(1, format!("df: {partition}: No such file or directory")),
            });
        }
        Ok(CommandOutput::failure(127, "command not found"))
    }
}

impl LivenessProbe for FakeFleet {
    fn is_reachable(&self, host: &str, _attempts: u32, _timeout: Duration) -> bool {
        self.hosts.get(host).is_some_and(|h| h.reachable)
    }
}

/// Fixed "now" used across integration tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    now() - chrono::Duration::days(days)
}

/// Result of one `fdm` invocation.
pub struct CliCaseResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CliCaseResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run the `fdm` binary and keep stdout/stderr in a log file named after the
/// case, so assertion messages can point at it.
pub fn run_cli_case_with_env(
    case_name: &str,
    args: &[&str],
    envs: &[(&str, &str)],
) -> CliCaseResult {
    let mut command = Command::new(env!("CARGO_BIN_EXE_fdm"));
    command
        .args(args)
        .env_remove("FDM_CONFIG")
        .env_remove("FDM_OUTPUT_FORMAT")
        .env("FDM_LOG", "warn");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("spawn fdm binary");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = std::env::temp_dir().join("fdm-cli-cases");
    let log_path = log_dir.join(format!("{case_name}.log"));
    let _ = std::fs::create_dir_all(&log_dir);
    let _ = std::fs::write(
        &log_path,
        format!(
            "args: {args:?}\nstatus: {:?}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
            output.status
        ),
    );

    CliCaseResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

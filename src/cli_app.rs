//! Top-level CLI definition and dispatch.

use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use fleet_disk_monitor::core::config::Config;
use fleet_disk_monitor::core::errors::FdmError;
use fleet_disk_monitor::core::hosts::{HostList, load_host_list};
use fleet_disk_monitor::daemon::driver::{Collaborators, Driver, RunSummary, consolidate_all};
use fleet_disk_monitor::daemon::lock::RunLock;
use fleet_disk_monitor::logger::jsonl::ActivityLog;
use fleet_disk_monitor::monitor::thresholds::{Classification, Thresholds};
use fleet_disk_monitor::remote::probe::PingProbe;
use fleet_disk_monitor::remote::ssh::SshRunner;
use fleet_disk_monitor::report::{ReportSection, ReportSink};
use fleet_disk_monitor::scanner::cache::{BigItemCache, Clock, SystemClock};
use fleet_disk_monitor::scanner::exclusion::ExclusionSet;
use fleet_disk_monitor::scanner::store::ScanKind;

/// Diagnostic log filter, e.g. `FDM_LOG=fleet_disk_monitor=debug`.
const LOG_ENV: &str = "FDM_LOG";
const OUTPUT_FORMAT_ENV: &str = "FDM_OUTPUT_FORMAT";

/// Fleet Disk Monitor: disk pressure sweeps over remote hosts.
#[derive(Debug, Parser)]
#[command(
    name = "fdm",
    author,
    version,
    about = "Fleet Disk Monitor - remote disk usage and largest-item reports",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one sweep over every configured host.
    Run(RunArgs),
    /// Print the fleet-wide largest-item ranking from the cache.
    Consolidated(ConsolidatedArgs),
    /// Inspect the big-item cache.
    Cache(CacheArgs),
    /// Parse the host list and show the effective per-host settings.
    Hosts,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct RunArgs {
    /// Only print partitions sorted by usage; no scans, no cache writes.
    #[arg(long)]
    sorted: bool,
    /// Report every known usage percent as 95% to exercise alerting.
    #[arg(long)]
    simulate_full: bool,
    /// Serve cached big-item data without refreshing stale entries.
    #[arg(long)]
    no_scan: bool,
    /// Number of hosts collected concurrently.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Args)]
struct ConsolidatedArgs {
    /// Restrict to one item kind.
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
    /// Number of rows to keep.
    #[arg(long, value_name = "N")]
    top: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum CacheCommand {
    /// Show missing/fresh/stale state per host, partition, and kind.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Directories,
    Files,
}

impl From<KindArg> for ScanKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Directories => Self::Directories,
            KindArg::Files => Self::Files,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Another sweep holds the run lock.
    #[error("{0}")]
    Locked(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Locked(_) => 5,
        }
    }
}

impl From<FdmError> for CliError {
    fn from(err: FdmError) -> Self {
        match err {
            FdmError::LockContention { .. } => Self::Locked(err.to_string()),
            FdmError::InvalidConfig { .. }
            | FdmError::MissingConfig { .. }
            | FdmError::ConfigParse { .. }
            | FdmError::HostSpec { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }
    init_tracing(cli);

    match &cli.command {
        Command::Run(args) => run_sweep(cli, args),
        Command::Consolidated(args) => run_consolidated(cli, args),
        Command::Cache(args) => match args.command {
            CacheCommand::Status => run_cache_status(cli),
        },
        Command::Hosts => run_hosts(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(!cli.no_color && io::stderr().is_terminal())
        .try_init();
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn run_sweep(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    apply_run_overrides(&mut config, args);
    config.validate()?;

    let _lock = RunLock::acquire(&config.paths.lock_file)?;

    let hosts = load_host_list(&config.paths.hosts_file)?;
    let exclusions = ExclusionSet::load(&config.paths.exclusion_file)?;
    let window = config.scan.staleness_window();
    let mut cache = if config.run.sorted_only {
        BigItemCache::empty(&config.paths.cache_dir, window)
    } else {
        BigItemCache::open(&config.paths.cache_dir, &config.scan.kinds, window)?
    };
    let activity = ActivityLog::new(config.paths.activity_log.clone());
    let runner = SshRunner::from_config(&config.remote);
    let probe = PingProbe::from_config(&config.remote);
    let clock = SystemClock;
    let driver = Driver::new(
        &config,
        &exclusions,
        Collaborators {
            runner: &runner,
            probe: &probe,
            clock: &clock,
        },
        &activity,
    );

    match output_mode(cli) {
        OutputMode::Human => {
            let mut sink = HumanSink;
            let summary = driver.run(&hosts, &mut cache, &mut sink);
            println!("{}", render_summary(&summary, &config));
        }
        OutputMode::Json => {
            let mut sink = JsonSink::default();
            let summary = driver.run(&hosts, &mut cache, &mut sink);
            sink.finish()?;
            write_json_line(&summary_payload(&summary, &config))?;
        }
    }
    Ok(())
}

fn apply_run_overrides(config: &mut Config, args: &RunArgs) {
    if args.sorted {
        config.run.sorted_only = true;
    }
    if args.simulate_full {
        config.run.simulate_full = true;
    }
    if args.no_scan {
        config.scan.enabled = false;
    }
    if let Some(workers) = args.workers {
        config.run.workers = workers;
    }
}

fn run_consolidated(cli: &Cli, args: &ConsolidatedArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(kind) = args.kind {
        config.scan.kinds = vec![kind.into()];
    }
    if let Some(top) = args.top {
        config.scan.consolidated_top = top;
    }
    config.validate()?;

    let hosts = load_host_list(&config.paths.hosts_file)?;
    let exclusions = ExclusionSet::load(&config.paths.exclusion_file)?;
    let cache = BigItemCache::open(
        &config.paths.cache_dir,
        &config.scan.kinds,
        config.scan.staleness_window(),
    )?;

    let mode = output_mode(cli);
    for (kind, rows) in consolidate_all(&config, &hosts.hosts, &exclusions, &cache) {
        let section = ReportSection::Consolidated { kind, rows };
        match mode {
            OutputMode::Human => println!("{}", render_section(&section)),
            OutputMode::Json => write_json_line(&serde_json::to_value(&section)?)?,
        }
    }
    Ok(())
}

fn run_cache_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let hosts = load_host_list(&config.paths.hosts_file)?;
    let exclusions = ExclusionSet::load(&config.paths.exclusion_file)?;
    let cache = BigItemCache::open(
        &config.paths.cache_dir,
        &config.scan.kinds,
        config.scan.staleness_window(),
    )?;
    let now = SystemClock.now();
    let mode = output_mode(cli);

    if mode == OutputMode::Human {
        println!(
            "{}",
            format!("cache: {}", cache.dir().display()).bold()
        );
    }
    for host in &hosts.hosts {
        let excluded = exclusions.is_excluded(&host.name);
        for partition in &host.partitions {
            for &kind in &config.scan.kinds {
                let state = cache.state(&host.name, partition, kind, now);
                let captured_at = cache
                    .entry(&host.name, partition, kind)
                    .map(|entry| entry.captured_at);
                match mode {
                    OutputMode::Human => {
                        let captured = captured_at.map_or_else(
                            || "-".to_string(),
                            |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        );
                        let marker = if excluded { " (excluded)" } else { "" };
                        println!(
                            "  {:<24} {:<16} {:<11} {:<7} {captured}{marker}",
                            host.name,
                            partition,
                            kind.label(),
                            state.as_str()
                        );
                    }
                    OutputMode::Json => write_json_line(&json!({
                        "host": host.name,
                        "partition": partition,
                        "kind": kind,
                        "state": state,
                        "captured_at": captured_at,
                        "excluded": excluded,
                    }))?,
                }
            }
        }
    }
    Ok(())
}

fn run_hosts(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let hosts = load_host_list(&config.paths.hosts_file)?;
    match output_mode(cli) {
        OutputMode::Human => println!("{}", render_hosts(&hosts, &config)),
        OutputMode::Json => write_json_line(&serde_json::to_value(&hosts)?)?,
    }
    Ok(())
}

fn render_hosts(hosts: &HostList, config: &Config) -> String {
    let mut out = String::new();
    for warning in &hosts.warnings {
        let _ = writeln!(
            out,
            "{} line {}: {}",
            "warning:".yellow(),
            warning.line_no,
            warning.message
        );
    }
    for host in &hosts.hosts {
        let thresholds = Thresholds::resolve(host, &config.thresholds);
        let _ = writeln!(
            out,
            "{:<32} {:<24} warn {:>3}%  crit {:>3}%",
            host.ssh_destination(),
            host.partitions.join(","),
            thresholds.warning,
            thresholds.critical
        );
    }
    let _ = write!(out, "{} host(s)", hosts.hosts.len());
    out
}

/// Prints each section as soon as it is emitted.
struct HumanSink;

impl ReportSink for HumanSink {
    fn emit(&mut self, section: ReportSection) {
        println!("{}", render_section(&section));
    }
}

/// One JSON object per section; the first write failure stops output.
#[derive(Default)]
struct JsonSink {
    error: Option<CliError>,
}

impl JsonSink {
    fn finish(self) -> Result<(), CliError> {
        self.error.map_or(Ok(()), Err)
    }
}

impl ReportSink for JsonSink {
    fn emit(&mut self, section: ReportSection) {
        if self.error.is_some() {
            return;
        }
        let written = serde_json::to_value(&section)
            .map_err(CliError::from)
            .and_then(|payload| write_json_line(&payload));
        if let Err(err) = written {
            self.error = Some(err);
        }
    }
}

fn paint(classification: Classification) -> ColoredString {
    match classification {
        Classification::Normal => "ok".green(),
        Classification::Warning => "WARNING".yellow().bold(),
        Classification::Critical => "CRITICAL".red().bold(),
    }
}

#[allow(clippy::too_many_lines)]
fn render_section(section: &ReportSection) -> String {
    match section {
        ReportSection::ConfigWarning { line_no, message } => {
            format!("{} hosts line {line_no}: {message}", "warning:".yellow())
        }
        ReportSection::HostHeader {
            host,
            os_kind,
            excluded,
            ..
        } => {
            let os = os_kind.map_or_else(|| "?".to_string(), |os| os.to_string());
            let marker = if *excluded { " [scan excluded]" } else { "" };
            format!("{}", format!("== {host} ({os}){marker}").bold())
        }
        ReportSection::HostUnreachable { reason, code, .. } => {
            format!(
                "  {} [{code}] ({reason} check failed)",
                "UNREACHABLE".red().bold()
            )
        }
        ReportSection::Usage {
            sample,
            thresholds,
            classification,
        } => {
            let pct = sample
                .used_percent
                .map_or_else(|| "?".to_string(), |p| format!("{p}%"));
            let inodes = sample
                .inode_percent
                .map(|p| format!(", inodes {p}%"))
                .unwrap_or_default();
            format!(
                "  {:<20} {:>5}  {}  ({} of {} on {}{inodes}; limits {}/{})",
                sample.partition,
                pct,
                paint(*classification),
                human_bytes(sample.used_bytes),
                human_bytes(sample.size_bytes),
                sample.mount_point,
                thresholds.warning,
                thresholds.critical
            )
        }
        ReportSection::SampleError {
            partition,
            code,
            error,
            ..
        } => format!("  {:<20} {} [{code}] {error}", partition, "ERROR".yellow()),
        ReportSection::BigItems {
            partition,
            kind,
            state,
            decision,
            entry,
            ..
        } => {
            let mut out = format!(
                "  largest {kind} on {partition} [{}, cache {}]",
                decision.as_str(),
                state.as_str()
            );
            match entry {
                Some(entry) => {
                    let _ = write!(
                        out,
                        " captured {}",
                        entry.captured_at.format("%Y-%m-%d %H:%M:%S")
                    );
                    for item in &entry.items {
                        let _ = write!(out, "\n    {:>10}  {}", item.size_label, item.path);
                    }
                }
                None => out.push_str("\n    (no cached data)"),
            }
            out
        }
        ReportSection::ScanFailure {
            partition,
            kind,
            error,
            ..
        } => format!(
            "  {} {kind} scan of {partition}: {error}",
            "scan failed:".yellow()
        ),
        ReportSection::HostElapsed { elapsed_ms, .. } => {
            format!("  {}", format!("elapsed {elapsed_ms} ms").dimmed())
        }
        ReportSection::CacheMerged { kind, stats } => format!(
            "cache {kind}: {} new, {} refreshed, {} older ignored",
            stats.inserted, stats.replaced, stats.ignored_older
        ),
        ReportSection::StoreError { kind, error } => {
            format!("{} {kind} cache not written: {error}", "ERROR".red().bold())
        }
        ReportSection::SortedUsage { rows } => {
            let mut out = format!("{}", "Partitions by usage".bold());
            for sample in rows {
                let pct = sample.used_percent.unwrap_or_default();
                let _ = write!(
                    out,
                    "\n  {:>4}  {:<32} {}",
                    format!("{pct}%"),
                    sample.host,
                    sample.partition
                );
            }
            out
        }
        ReportSection::Consolidated { kind, rows } => {
            let mut out = format!("{}", format!("Largest {kind} across the fleet").bold());
            if rows.is_empty() {
                out.push_str("\n  (no cached data)");
            }
            for (rank, row) in rows.iter().enumerate() {
                let _ = write!(
                    out,
                    "\n  {:>3}. {:>10}  {:<24} {}",
                    rank + 1,
                    row.display_size,
                    row.host,
                    row.path
                );
            }
            out
        }
    }
}

fn render_summary(summary: &RunSummary, config: &Config) -> String {
    let overall = if summary.any_critical {
        paint(Classification::Critical)
    } else if summary.any_warning {
        paint(Classification::Warning)
    } else {
        paint(Classification::Normal)
    };
    let mut out = format!("overall: {overall}");
    if !summary.unreachable.is_empty() {
        let _ = write!(out, "\nunreachable: {}", summary.unreachable.join(", "));
    }
    let recipients = summary.recipients(&config.mail);
    if !recipients.is_empty() {
        let _ = write!(out, "\nrecipients: {}", recipients.join(", "));
    }
    out
}

fn summary_payload(summary: &RunSummary, config: &Config) -> Value {
    json!({
        "section": "summary",
        "started_at": summary.started_at,
        "any_warning": summary.any_warning,
        "any_critical": summary.any_critical,
        "unreachable": summary.unreachable,
        "store_errors": summary.store_errors,
        "recipients": summary.recipients(&config.mail),
    })
}

#[allow(clippy::cast_precision_loss)]
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var(OUTPUT_FORMAT_ENV).ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

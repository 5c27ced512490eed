//! Persistent big-item store, one per scan kind.
//!
//! In memory the store is keyed by `(host, partition)`; the block text format
//! only exists at the file boundary:
//!
//! ```text
//! Host: web01, Partition: /var, Date: 2026-10-12 03:00:00 (Directories)
//! 1.5G /var/lib
//! 820M /var/log
//! ---
//! ```

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::errors::{FdmError, Result};

/// Line terminating each block.
pub const BLOCK_DELIMITER: &str = "---";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which expensive scan produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Directories,
    Files,
}

impl ScanKind {
    pub const ALL: [Self; 2] = [Self::Directories, Self::Files];

    /// Label used in block headers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Directories => "Directories",
            Self::Files => "Files",
        }
    }

    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Directories => "bigdirs.cache",
            Self::Files => "bigfiles.cache",
        }
    }

    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "directories" | "dirs" => Some(Self::Directories),
            "files" => Some(Self::Files),
            _ => None,
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One ranked line of a scan: human size label and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BigItem {
    pub size_label: String,
    pub path: String,
}

impl BigItem {
    #[must_use]
    pub fn new(size_label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            size_label: size_label.into(),
            path: path.into(),
        }
    }

    /// Parse `"<size><ws><path>"`; the path keeps inner whitespace.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let (size, path) = line.split_once(char::is_whitespace)?;
        let path = path.trim();
        if size.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self::new(size, path))
    }
}

/// Identity of a cache entry within a store of one kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub host: String,
    pub partition: String,
}

/// Result of one big-item scan of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub host: String,
    pub partition: String,
    pub kind: ScanKind,
    pub captured_at: DateTime<Utc>,
    pub items: Vec<BigItem>,
}

impl CacheEntry {
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey {
            host: self.host.clone(),
            partition: self.partition.clone(),
        }
    }

    fn header(&self) -> String {
        format!(
            "Host: {}, Partition: {}, Date: {} ({})",
            self.host,
            self.partition,
            self.captured_at.format(DATE_FORMAT),
            self.kind.label()
        )
    }
}

/// Counters describing what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: usize,
    pub replaced: usize,
    /// Incoming entries older than what the store already held.
    pub ignored_older: usize,
}

/// All entries of one scan kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    kind: ScanKind,
    entries: BTreeMap<CacheKey, CacheEntry>,
}

impl CacheStore {
    #[must_use]
    pub fn new(kind: ScanKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ScanKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, host: &str, partition: &str) -> Option<&CacheEntry> {
        self.entries.get(&CacheKey {
            host: host.to_string(),
            partition: partition.to_string(),
        })
    }

    /// Entries of one host, ordered by partition.
    pub fn entries_for_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a CacheEntry> {
        self.entries.values().filter(move |e| e.host == host)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Merge entries: untouched keys are retained, touched keys are replaced
    /// unless the stored capture is newer. Entries of another kind are
    /// dropped.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = CacheEntry>) -> MergeStats {
        let mut stats = MergeStats::default();
        for entry in incoming {
            if entry.kind != self.kind {
                warn!(
                    host = %entry.host,
                    expected = %self.kind,
                    got = %entry.kind,
                    "dropping cache entry of the wrong kind"
                );
                continue;
            }
            match self.entries.get(&entry.key()) {
                Some(existing) if existing.captured_at > entry.captured_at => {
                    stats.ignored_older += 1;
                }
                Some(_) => {
                    stats.replaced += 1;
                    self.entries.insert(entry.key(), entry);
                }
                None => {
                    stats.inserted += 1;
                    self.entries.insert(entry.key(), entry);
                }
            }
        }
        stats
    }

    /// Render the block text format, ordered by host then partition.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.values() {
            let _ = writeln!(out, "{}", entry.header());
            for item in &entry.items {
                let _ = writeln!(out, "{} {}", item.size_label, item.path);
            }
            let _ = writeln!(out, "{BLOCK_DELIMITER}");
        }
        out
    }

    /// Parse the block text format.
    ///
    /// Blocks whose date cannot be read take `fallback_date`, or are skipped
    /// when there is none. Repeated blocks for one key collapse to the newest.
    /// Blocks labelled with another kind are skipped and stray lines ignored.
    #[must_use]
    pub fn parse(kind: ScanKind, text: &str, fallback_date: Option<DateTime<Utc>>) -> Self {
        Self::parse_checked(kind, text, fallback_date, Path::new("<memory>")).0
    }

    /// Like [`CacheStore::parse`], also returning one
    /// [`FdmError::CacheParse`] per skipped block, attributed to `source`.
    #[must_use]
    pub fn parse_checked(
        kind: ScanKind,
        text: &str,
        fallback_date: Option<DateTime<Utc>>,
        source: &Path,
    ) -> (Self, Vec<FdmError>) {
        let mut store = Self::new(kind);
        let mut problems = Vec::new();
        let mut current: Option<CacheEntry> = None;
        let mut skipping = false;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line == BLOCK_DELIMITER {
                store.merge(current.take());
                skipping = false;
                continue;
            }
            if let Some(header) = parse_header(line) {
                store.merge(current.take());
                skipping = false;
                if header.kind != Some(kind) {
                    problems.push(FdmError::CacheParse {
                        path: source.to_path_buf(),
                        line_no: idx + 1,
                        details: format!(
                            "block labelled {:?}, expected {kind}",
                            header.kind_label
                        ),
                    });
                    skipping = true;
                    continue;
                }
                let Some(captured_at) = parse_date(&header.date).or(fallback_date) else {
                    problems.push(FdmError::CacheParse {
                        path: source.to_path_buf(),
                        line_no: idx + 1,
                        details: format!("unreadable date {:?}", header.date),
                    });
                    skipping = true;
                    continue;
                };
                current = Some(CacheEntry {
                    host: header.host,
                    partition: header.partition,
                    kind,
                    captured_at,
                    items: Vec::new(),
                });
                continue;
            }
            if skipping {
                continue;
            }
            match (current.as_mut(), BigItem::parse_line(line)) {
                (Some(entry), Some(item)) => entry.items.push(item),
                _ => debug!(line_no = idx + 1, "ignoring stray cache line"),
            }
        }
        store.merge(current.take());
        (store, problems)
    }

    /// Load a store file; a missing file is an empty store. Skipped blocks
    /// are logged and otherwise dropped.
    pub fn load(path: &Path, kind: ScanKind) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(kind));
        }
        let text = std::fs::read_to_string(path).map_err(|e| FdmError::io(path, e))?;
        let fallback = file_modified_at(path);
        let (store, problems) = Self::parse_checked(kind, &text, fallback, path);
        for err in &problems {
            warn!(code = err.code(), %err, "skipping cache block");
        }
        Ok(store)
    }

    /// Write the store via a temp file renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| FdmError::io(dir, e))?;
        let tmp = temp_path(path);
        {
            let mut file = std::fs::File::create(&tmp).map_err(|e| FdmError::io(&tmp, e))?;
            file.write_all(self.render().as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(|e| FdmError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, path).map_err(|e| FdmError::io(path, e))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Modification time of `path`, the age source for blocks without a
/// readable date.
#[must_use]
pub fn file_modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

struct Header {
    host: String,
    partition: String,
    date: String,
    kind_label: String,
    kind: Option<ScanKind>,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Host:\s*(?P<host>[^,]+),\s*Partition:\s*(?P<partition>.+?),\s*Date:\s*(?P<date>.+?)\s*\((?P<kind>[A-Za-z]+)\)$")
            .unwrap_or_else(|e| unreachable!("static header regex is valid: {e}"))
    })
}

fn parse_header(line: &str) -> Option<Header> {
    let caps = header_regex().captures(line)?;
    let kind_label = caps["kind"].to_string();
    Some(Header {
        host: caps["host"].trim().to_string(),
        partition: caps["partition"].trim().to_string(),
        date: caps["date"].trim().to_string(),
        kind: ScanKind::from_label(&kind_label),
        kind_label,
    })
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, DATE_FORMAT) {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

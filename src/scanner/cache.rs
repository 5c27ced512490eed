//! Staleness-gated big-item cache.
//!
//! Per `(host, partition, kind)` an entry is Missing, Fresh, or Stale.
//! Missing and Stale entries of non-excluded hosts are rescanned when
//! scanning is enabled; Fresh entries are served as-is. With scanning
//! disabled nothing transitions and whatever exists is served.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::core::errors::Result;
use crate::scanner::store::{CacheEntry, CacheStore, MergeStats, ScanKind};

/// Source of "now" for staleness decisions.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Age of the cached entry for one `(host, partition, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// No entry has ever been stored.
    Missing,
    /// Captured within the staleness window.
    Fresh,
    /// Older than the staleness window.
    Stale,
}

/// What the driver should do for one `(host, partition, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDecision {
    /// Run a new scan and stage its entry for the end-of-run merge.
    Scan,
    /// Report whatever the store already holds.
    ServeCached,
    /// Host is in the exclusion set: neither scanned nor reported.
    Excluded,
}

impl CacheState {
    /// Lowercase label for text and JSON output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
        }
    }
}

impl ScanDecision {
    /// Past-tense label for text and JSON output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scanned",
            Self::ServeCached => "cached",
            Self::Excluded => "excluded",
        }
    }
}

/// An entry is stale once its age exceeds `window`; captures from the
/// future count as fresh.
#[must_use]
pub fn cache_state(
    entry: Option<&CacheEntry>,
    now: DateTime<Utc>,
    window: Duration,
) -> CacheState {
    let Some(entry) = entry else {
        return CacheState::Missing;
    };
    let age = now
        .signed_duration_since(entry.captured_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if age > window {
        CacheState::Stale
    } else {
        CacheState::Fresh
    }
}

/// Exclusion wins over everything; with scanning disabled the cache is
/// served whatever its state.
#[must_use]
pub const fn decide(state: CacheState, excluded: bool, scanning_enabled: bool) -> ScanDecision {
    if excluded {
        return ScanDecision::Excluded;
    }
    if !scanning_enabled {
        return ScanDecision::ServeCached;
    }
    match state {
        CacheState::Missing | CacheState::Stale => ScanDecision::Scan,
        CacheState::Fresh => ScanDecision::ServeCached,
    }
}

/// The cache as a whole: one store per kind under a directory.
///
/// Sole writer of the store files. Writes re-read the file, merge, and
/// replace it, so entries of hosts not scanned this run survive.
#[derive(Debug, Clone)]
pub struct BigItemCache {
    dir: PathBuf,
    window: Duration,
    stores: BTreeMap<ScanKind, CacheStore>,
}

impl BigItemCache {
    /// Load the stores for `kinds` from `dir`.
    pub fn open(dir: &Path, kinds: &[ScanKind], window: Duration) -> Result<Self> {
        let mut stores = BTreeMap::new();
        for &kind in kinds {
            let store = CacheStore::load(&dir.join(kind.file_name()), kind)?;
            stores.insert(kind, store);
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            window,
            stores,
        })
    }

    /// Cache with no stores loaded, for runs that never consult it.
    #[must_use]
    pub fn empty(dir: &Path, window: Duration) -> Self {
        Self {
            dir: dir.to_path_buf(),
            window,
            stores: BTreeMap::new(),
        }
    }

    /// Directory holding the store files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Staleness window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// File backing the store for `kind`.
    #[must_use]
    pub fn store_path(&self, kind: ScanKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// In-memory store for `kind`, if it was opened.
    #[must_use]
    pub fn store(&self, kind: ScanKind) -> Option<&CacheStore> {
        self.stores.get(&kind)
    }

    /// Cached entry for one `(host, partition, kind)`.
    #[must_use]
    pub fn entry(&self, host: &str, partition: &str, kind: ScanKind) -> Option<&CacheEntry> {
        self.stores.get(&kind)?.get(host, partition)
    }

    /// [`CacheState`] of one entry as of `now`.
    #[must_use]
    pub fn state(
        &self,
        host: &str,
        partition: &str,
        kind: ScanKind,
        now: DateTime<Utc>,
    ) -> CacheState {
        cache_state(self.entry(host, partition, kind), now, self.window)
    }

    /// Read-merge-write `new_entries` into the store file of `kind` and
    /// refresh the in-memory copy.
    pub fn persist_merge(
        &mut self,
        kind: ScanKind,
        new_entries: Vec<CacheEntry>,
    ) -> Result<MergeStats> {
        let path = self.store_path(kind);
        let mut on_disk = CacheStore::load(&path, kind)?;
        if new_entries.is_empty() {
            self.stores.insert(kind, on_disk);
            return Ok(MergeStats::default());
        }
        let stats = on_disk.merge(new_entries);
        on_disk.save(&path)?;
        info!(
            kind = %kind,
            inserted = stats.inserted,
            replaced = stats.replaced,
            total = on_disk.len(),
            "cache store merged"
        );
        self.stores.insert(kind, on_disk);
        Ok(stats)
    }
}

//! Hosts opted out of big-item scans and consolidated reports.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use crate::core::errors::{FdmError, Result};

/// Exact-match set of host names. No wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    hosts: BTreeSet<String>,
}

impl ExclusionSet {
    /// Set holding exactly `hosts`.
    #[must_use]
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    /// One host per line; `#` comments and blank lines ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(|l| l.split('#').next().unwrap_or_default().trim())
                .filter(|l| !l.is_empty()),
        )
    }

    /// A missing file means nothing is excluded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no exclusion file");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| FdmError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    /// Exact, case-sensitive membership.
    #[must_use]
    pub fn is_excluded(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Number of excluded hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// No host is excluded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

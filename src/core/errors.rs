//! FDM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FdmError>;

/// Top-level error type for the fleet disk monitor.
#[derive(Debug, Error)]
pub enum FdmError {
    #[error("[FDM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FDM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FDM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FDM-1004] malformed host line {line_no}: {details}")]
    HostSpec { line_no: usize, details: String },

    #[error("[FDM-2001] host {host} unreachable ({reason})")]
    Unreachable { host: String, reason: String },

    #[error("[FDM-2002] usage sample unavailable for {host}:{partition}: {details}")]
    SampleUnavailable {
        host: String,
        partition: String,
        details: String,
    },

    #[error("[FDM-2003] usage percent unknown for {host}:{partition}")]
    UnknownPercent { host: String, partition: String },

    #[error("[FDM-2004] {kind} scan failed for {host}:{partition}: {details}")]
    ScanFailure {
        host: String,
        partition: String,
        kind: &'static str,
        details: String,
    },

    #[error("[FDM-2101] cache store parse failure at {path} line {line_no}: {details}")]
    CacheParse {
        path: PathBuf,
        line_no: usize,
        details: String,
    },

    #[error("[FDM-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FDM-3001] another run holds the lock at {path}")]
    LockContention { path: PathBuf },

    #[error("[FDM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FDM-3003] command `{program}` timed out after {timeout:?}")]
    CommandTimeout { program: String, timeout: Duration },

    #[error("[FDM-3004] failed to spawn `{program}`: {details}")]
    CommandSpawn { program: String, details: String },

    #[error("[FDM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FdmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FDM-1001",
            Self::MissingConfig { .. } => "FDM-1002",
            Self::ConfigParse { .. } => "FDM-1003",
            Self::HostSpec { .. } => "FDM-1004",
            Self::Unreachable { .. } => "FDM-2001",
            Self::SampleUnavailable { .. } => "FDM-2002",
            Self::UnknownPercent { .. } => "FDM-2003",
            Self::ScanFailure { .. } => "FDM-2004",
            Self::CacheParse { .. } => "FDM-2101",
            Self::Serialization { .. } => "FDM-2102",
            Self::LockContention { .. } => "FDM-3001",
            Self::Io { .. } => "FDM-3002",
            Self::CommandTimeout { .. } => "FDM-3003",
            Self::CommandSpawn { .. } => "FDM-3004",
            Self::Runtime { .. } => "FDM-3900",
        }
    }

    /// Whether a later run might succeed where this one failed.
    ///
    /// Advisory only: nothing in the collection pipeline retries within a run.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Unreachable { .. }
                | Self::SampleUnavailable { .. }
                | Self::ScanFailure { .. }
                | Self::CommandTimeout { .. }
                | Self::LockContention { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for FdmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FdmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for FdmError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

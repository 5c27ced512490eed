//! Threshold resolution and usage classification.

use std::fmt;

use serde::Serialize;

use crate::core::config::ThresholdsConfig;
use crate::core::errors::{FdmError, Result};
use crate::core::hosts::HostDescriptor;
use crate::monitor::usage::UsageSample;

/// Alert level of one partition sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Below the warning threshold.
    Normal,
    /// At or above warning, below critical.
    Warning,
    /// At or above critical.
    Critical,
}

impl Classification {
    /// Lowercase label for logs and JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective (warning, critical) pair for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    /// Lowest percent classified as warning.
    pub warning: u8,
    /// Lowest percent classified as critical.
    pub critical: u8,
}

impl Thresholds {
    /// Host values override the global defaults independently.
    #[must_use]
    pub fn resolve(host: &HostDescriptor, global: &ThresholdsConfig) -> Self {
        Self {
            warning: host.warning.unwrap_or(global.warning),
            critical: host.critical.unwrap_or(global.critical),
        }
    }

    /// Critical is checked first, so an inverted pair still classifies
    /// deterministically.
    #[must_use]
    pub const fn classify(self, used_percent: u8) -> Classification {
        if used_percent >= self.critical {
            Classification::Critical
        } else if used_percent >= self.warning {
            Classification::Warning
        } else {
            Classification::Normal
        }
    }

    /// Classify a sample; an unknown percent is a reporting error.
    pub fn evaluate(self, sample: &UsageSample) -> Result<Classification> {
        sample
            .used_percent
            .map(|pct| self.classify(pct))
            .ok_or_else(|| FdmError::UnknownPercent {
                host: sample.host.clone(),
                partition: sample.partition.clone(),
            })
    }
}

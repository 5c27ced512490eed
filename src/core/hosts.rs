//! Host list parsing: `[principal@]host[:partitions][:warning][:critical]`.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::core::errors::{FdmError, Result};

/// Partition used when a host line names none.
pub const DEFAULT_PARTITION: &str = "/";

/// One monitored host as described by a single host-list line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDescriptor {
    pub name: String,
    pub principal: Option<String>,
    /// Never empty.
    pub partitions: Vec<String>,
    pub warning: Option<u8>,
    pub critical: Option<u8>,
}

impl HostDescriptor {
    /// Descriptor with the default partition and no threshold overrides.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            principal: None,
            partitions: vec![DEFAULT_PARTITION.to_string()],
            warning: None,
            critical: None,
        }
    }

    /// `principal@name`, or just the name.
    #[must_use]
    pub fn ssh_destination(&self) -> String {
        match &self.principal {
            Some(principal) => format!("{principal}@{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ssh_destination(), self.partitions.join(","))
    }
}

/// Non-fatal problem found while reading the host list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub line_no: usize,
    pub message: String,
}

/// Result of parsing a whole host-list document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostList {
    /// Sorted by host name, unique.
    pub hosts: Vec<HostDescriptor>,
    pub warnings: Vec<ConfigWarning>,
}

/// Parse one non-empty, non-comment line.
///
/// Threshold fields that are not integers are ignored. Integers above 100 are
/// dropped with a warning, and so is the pair when warning >= critical: the
/// descriptor keeps the values but the caller learns about it.
pub fn parse_host_line(line: &str, line_no: usize) -> Result<(HostDescriptor, Vec<String>)> {
    let mut fields = line.split(':');
    let target = strip_ws(fields.next().unwrap_or_default());

    let (principal, name) = match target.split_once('@') {
        Some((principal, host)) => {
            let principal = (!principal.is_empty()).then(|| principal.to_string());
            (principal, host.to_string())
        }
        None => (None, target),
    };

    if name.is_empty() {
        return Err(FdmError::HostSpec {
            line_no,
            details: format!("empty host name in {line:?}"),
        });
    }

    let partitions: Vec<String> = fields
        .next()
        .map(|raw| {
            raw.split(',')
                .map(strip_ws)
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let partitions = if partitions.is_empty() {
        vec![DEFAULT_PARTITION.to_string()]
    } else {
        partitions
    };

    let mut notes = Vec::new();
    let warning = fields
        .next()
        .and_then(|raw| threshold_field(raw, "warning", &mut notes));
    let critical = fields
        .next()
        .and_then(|raw| threshold_field(raw, "critical", &mut notes));

    match (warning, critical) {
        (Some(w), Some(c)) if w >= c => notes.push(format!(
            "host {name}: warning threshold {w} is not below critical threshold {c}"
        )),
        _ => {}
    }

    Ok((
        HostDescriptor {
            name,
            principal,
            partitions,
            warning,
            critical,
        },
        notes,
    ))
}

fn threshold_field(raw: &str, label: &str, notes: &mut Vec<String>) -> Option<u8> {
    let cleaned = strip_ws(raw);
    if cleaned.is_empty() || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match cleaned.parse::<u32>() {
        Ok(value) if value <= 100 => u8::try_from(value).ok(),
        _ => {
            notes.push(format!("{label} threshold {cleaned} is outside 0..=100; ignored"));
            None
        }
    }
}

fn strip_ws(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parse a host-list document. Malformed and duplicate lines become warnings.
#[must_use]
pub fn parse_host_list(text: &str) -> HostList {
    let mut list = HostList::default();
    let mut seen = HashSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_host_line(line, line_no) {
            Ok((host, notes)) => {
                list.warnings
                    .extend(notes.into_iter().map(|message| ConfigWarning { line_no, message }));
                if seen.insert(host.name.clone()) {
                    list.hosts.push(host);
                } else {
                    list.warnings.push(ConfigWarning {
                        line_no,
                        message: format!("duplicate host {}; first definition kept", host.name),
                    });
                }
            }
            Err(err) => list.warnings.push(ConfigWarning {
                line_no,
                message: err.to_string(),
            }),
        }
    }

    list.hosts.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

/// Read and parse the host-list file.
pub fn load_host_list(path: &Path) -> Result<HostList> {
    if !path.exists() {
        return Err(FdmError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|e| FdmError::io(path, e))?;
    Ok(parse_host_list(&text))
}

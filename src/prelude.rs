//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fleet_disk_monitor::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{FdmError, Result};
pub use crate::core::hosts::{HostDescriptor, HostList, load_host_list, parse_host_list};

// Remote
pub use crate::remote::probe::{LivenessProbe, PingProbe};
pub use crate::remote::ssh::{RemoteRunner, SshRunner};

// Monitor
pub use crate::monitor::thresholds::{Classification, Thresholds};
pub use crate::monitor::usage::{OsKind, UsageSample};

// Scanner
pub use crate::scanner::cache::{BigItemCache, Clock, SystemClock};
pub use crate::scanner::consolidate::{ConsolidatedRow, DedupPolicy};
pub use crate::scanner::exclusion::ExclusionSet;
pub use crate::scanner::store::{CacheEntry, CacheStore, ScanKind};

// Run
pub use crate::daemon::driver::{Collaborators, Driver, RunSummary};
pub use crate::daemon::lock::RunLock;
pub use crate::logger::jsonl::ActivityLog;
pub use crate::report::{CollectingSink, ReportSection, ReportSink};

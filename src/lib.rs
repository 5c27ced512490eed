#![forbid(unsafe_code)]

//! Fleet Disk Monitor (fdm): periodic disk-pressure sweeps over a fleet of
//! remote hosts.
//!
//! One sweep does three things:
//! 1. **Usage sampling**: per-partition `df` over ssh, classified against
//!    global or per-host warning/critical thresholds
//! 2. **Big-item scans**: largest directories and files per partition,
//!    cached on disk and refreshed only once stale
//! 3. **Consolidated ranking**: fleet-wide top list built from the cache

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod prelude;
pub mod remote;
pub mod report;
pub mod scanner;

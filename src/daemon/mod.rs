//! Run orchestration: the per-host sweep driver and the process-level run lock.

pub mod driver;
pub mod lock;

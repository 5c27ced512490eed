//! Per-partition monitoring: remote usage sampling and threshold
//! classification.

pub mod thresholds;
pub mod usage;

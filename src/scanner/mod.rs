//! Big-item scanning: remote scans, the staleness-gated cache and its
//! persistent store, exclusions, and fleet-wide consolidation.

pub mod bigitems;
pub mod cache;
pub mod consolidate;
pub mod exclusion;
pub mod store;

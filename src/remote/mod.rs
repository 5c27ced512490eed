//! Remote plumbing: bounded child processes, ssh execution, liveness probes.

pub mod exec;
pub mod probe;
pub mod ssh;

//! Host liveness: ICMP ping plus an optional ssh round trip.

use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::core::config::RemoteConfig;
use crate::core::hosts::HostDescriptor;
use crate::remote::exec::run_with_timeout;
use crate::remote::ssh::RemoteRunner;

/// Liveness test run before any remote command is issued.
pub trait LivenessProbe: Send + Sync {
    /// Never blocks longer than roughly `attempts * timeout`.
    fn is_reachable(&self, host: &str, attempts: u32, timeout: Duration) -> bool;
}

/// [`LivenessProbe`] using the system `ping`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    binary: String,
}

impl PingProbe {
    /// Probe running `binary` (looked up on `PATH` when not absolute).
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Probe using the configured ping binary.
    #[must_use]
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.ping_binary.clone())
    }

    /// Arguments for one probe: `attempts` echo requests, each waiting at
    /// most `timeout` (rounded up to whole seconds).
    #[must_use]
    pub fn build_args(host: &str, attempts: u32, timeout: Duration) -> Vec<String> {
        let secs = timeout.as_secs().max(1);
        // BSD ping takes the per-reply wait in milliseconds.
        let wait = if cfg!(any(target_os = "macos", target_os = "freebsd")) {
            (secs * 1000).to_string()
        } else {
            secs.to_string()
        };
        vec![
            "-c".to_string(),
            attempts.to_string(),
            "-W".to_string(),
            wait,
            host.to_string(),
        ]
    }
}

impl LivenessProbe for PingProbe {
    fn is_reachable(&self, host: &str, attempts: u32, timeout: Duration) -> bool {
        let mut cmd = Command::new(&self.binary);
        cmd.args(Self::build_args(host, attempts, timeout));
        let bound = timeout * attempts.max(1) + Duration::from_secs(1);
        match run_with_timeout(cmd, bound) {
            Ok(out) => out.succeeded(),
            Err(err) => {
                debug!(%host, %err, "ping failed");
                false
            }
        }
    }
}

/// Why a host was judged unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unreachable {
    /// No echo reply within the configured attempts.
    Ping,
    /// Ping answered but the ssh round trip failed.
    Ssh,
}

impl Unreachable {
    /// Short label used in reports and the activity log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Ssh => "ssh",
        }
    }
}

/// Ping the host, then optionally require a trivial ssh command to succeed.
pub fn check_host(
    host: &HostDescriptor,
    probe: &dyn LivenessProbe,
    runner: &dyn RemoteRunner,
    config: &RemoteConfig,
) -> Result<(), Unreachable> {
    if !probe.is_reachable(&host.name, config.ping_attempts, config.ping_timeout()) {
        return Err(Unreachable::Ping);
    }
    if config.check_ssh {
        match runner.run(host, "true", config.connect_timeout() + Duration::from_secs(1)) {
            Ok(out) if out.succeeded() => {}
            Ok(out) => {
                debug!(host = %host.name, status = ?out.status, "ssh liveness check failed");
                return Err(Unreachable::Ssh);
            }
            Err(err) => {
                debug!(host = %host.name, %err, "ssh liveness check failed");
                return Err(Unreachable::Ssh);
            }
        }
    }
    Ok(())
}

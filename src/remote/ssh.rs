//! Remote command execution over the system `ssh` client.

use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::core::config::RemoteConfig;
use crate::core::errors::Result;
use crate::core::hosts::HostDescriptor;
use crate::remote::exec::{CommandOutput, run_with_timeout};

/// Executes a shell command on a monitored host.
///
/// A non-zero exit is reported through [`CommandOutput::status`], not as an
/// error; errors mean the command could not be run or timed out.
pub trait RemoteRunner: Send + Sync {
    /// Run `command` on `host`, giving up after `timeout`.
    fn run(&self, host: &HostDescriptor, command: &str, timeout: Duration)
    -> Result<CommandOutput>;
}

/// [`RemoteRunner`] backed by the OpenSSH client in batch mode.
#[derive(Debug, Clone)]
pub struct SshRunner {
    binary: String,
    connect_timeout: Duration,
}

impl SshRunner {
    /// Runner invoking `binary` with the given `ConnectTimeout`.
    #[must_use]
    pub fn new(binary: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            connect_timeout,
        }
    }

    /// Runner using the configured ssh binary and connect timeout.
    #[must_use]
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.ssh_binary.clone(), config.connect_timeout())
    }

    /// Arguments passed to the ssh binary, excluding the binary itself.
    #[must_use]
    pub fn build_args(&self, host: &HostDescriptor, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(principal) = &host.principal {
            args.push("-l".to_string());
            args.push(principal.clone());
        }
        args.push(host.name.clone());
        args.push(command.to_string());
        args
    }
}

impl RemoteRunner for SshRunner {
    fn run(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(host = %host.name, %command, "remote exec");
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args(host, command));
        run_with_timeout(cmd, timeout)
    }
}

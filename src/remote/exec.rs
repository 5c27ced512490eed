//! Child-process execution with a hard deadline.
//!
//! stdout and stderr are drained on reader threads so the child can never
//! block on a full pipe while the parent polls for exit.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};
use tracing::debug;

use crate::core::errors::{FdmError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything written to stdout, lossily decoded.
    pub stdout: String,
    /// Everything written to stderr, lossily decoded.
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    /// Zero-status output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    /// Non-zero-status output with the given stderr.
    #[must_use]
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    /// Exited normally with status 0.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.status, Some(0))
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> Receiver<String> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = source {
            let _ = reader.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Run `command` to completion or kill it once `timeout` elapses.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<CommandOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FdmError::CommandSpawn {
            program: program.clone(),
            details: e.to_string(),
        })?;

    let stdout_rx = drain(child.stdout.take());
    let stderr_rx = drain(child.stderr.take());

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(%program, ?timeout, "command killed after deadline");
                    return Err(FdmError::CommandTimeout { program, timeout });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(FdmError::Runtime {
                    details: format!("waiting on `{program}` failed: {e}"),
                });
            }
        }
    };

    // Grandchildren may still hold the pipes open; do not wait on them forever.
    let grace = Duration::from_secs(1);
    let stdout = stdout_rx.recv_timeout(grace).unwrap_or_default();
    let stderr = stderr_rx.recv_timeout(grace).unwrap_or_default();

    Ok(CommandOutput {
        stdout,
        stderr,
        status: status.code(),
    })
}

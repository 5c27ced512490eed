//! Process-level run lock: one sweep system-wide, fail fast on contention.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::errors::{FdmError, Result};

/// Held for the lifetime of a run; released on drop.
pub struct RunLock {
    path: PathBuf,
    #[cfg(unix)]
    _guard: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl RunLock {
    /// Take an exclusive, non-blocking lock on `path`.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FdmError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| FdmError::io(path, e))?;
        Self::lock_file(path, file)
    }

    #[cfg(unix)]
    fn lock_file(path: &Path, file: File) -> Result<Self> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut guard) => {
                write_pid(&mut guard);
                debug!(path = %path.display(), "run lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                    _guard: guard,
                })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(FdmError::LockContention {
                path: path.to_path_buf(),
            }),
            Err((_, errno)) => Err(FdmError::io(path, std::io::Error::from(errno))),
        }
    }

    #[cfg(not(unix))]
    fn lock_file(path: &Path, mut file: File) -> Result<Self> {
        write_pid(&mut file);
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// Lock file this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

fn write_pid(file: &mut File) {
    let _ = file.set_len(0);
    let _ = writeln!(file, "{}", std::process::id());
}

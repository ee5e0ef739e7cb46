//! # Home Directory Lock
//!
//! Only one agent process may own a home directory: two writers on the same
//! chain buffer would interleave telemetry and fork the hash chain.
//!
//! Uses `fs2` for cross-platform file locking (flock on Unix, LockFile on Windows).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Errors from home directory locking
#[derive(Debug)]
pub enum LockError {
    /// Lock file could not be created
    CreateFailed(io::Error),
    /// Home directory is owned by another agent process
    AlreadyLocked { pid: Option<u32>, path: PathBuf },
    /// Failed to write PID to lock file
    WriteFailed(io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::CreateFailed(e) => write!(f, "Failed to create lock file: {}", e),
            LockError::AlreadyLocked { pid, path } => match pid {
                Some(p) => write!(f, "Teller home already in use by process {} ({})", p, path.display()),
                None => write!(f, "Teller home already in use ({})", path.display()),
            },
            LockError::WriteFailed(e) => write!(f, "Failed to write PID to lock file: {}", e),
        }
    }
}

impl std::error::Error for LockError {}

/// Exclusive lock on a teller home directory, released on drop.
pub struct HomeLock {
    file: File,
    path: PathBuf,
    pid: u32,
}

impl HomeLock {
    /// Lock file name
    pub const LOCK_FILE: &'static str = "teller.lock";

    /// Acquire the lock, creating `home` if needed.
    pub fn acquire(home: &Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(home).map_err(LockError::CreateFailed)?;
        let lock_path = home.join(Self::LOCK_FILE);

        // Not truncated before locking: a running owner's PID must survive.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyLocked {
                pid: Self::read_existing_pid(&lock_path),
                path: lock_path,
            });
        }

        let pid = std::process::id();
        file.set_len(0).map_err(LockError::WriteFailed)?;
        writeln!(file, "{}", pid).map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;

        Ok(Self {
            file,
            path: lock_path,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for HomeLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

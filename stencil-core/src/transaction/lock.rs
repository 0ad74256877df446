//! Exclusive advisory lock on a working copy

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::debug;

use super::Deadline;
use crate::{Error, Result};

/// Lock file name inside the metadata directory
pub const LOCK_FILE: &str = "stencil.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Held for the duration of one bracketed operation; released on drop
///
/// The lock is an OS file lock, so it excludes other threads (each with
/// their own handle) and other processes on the same host.
#[derive(Debug)]
pub struct WorkingCopyLock {
    file: File,
    path: PathBuf,
}

impl WorkingCopyLock {
    /// Block until the lock is ours or the deadline passes
    pub fn acquire(git_dir: &Path, deadline: &Deadline) -> Result<Self> {
        let path = git_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if deadline.expired() {
                        return Err(Error::Timeout(deadline.limit()));
                    }
                    std::thread::sleep(POLL_INTERVAL.min(deadline.remaining()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(path = %path.display(), "Acquired working copy lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for WorkingCopyLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release working copy lock");
        } else {
            debug!(path = %self.path.display(), "Released working copy lock");
        }
    }
}

//! Exclusive build lock for a cache entry.
//!
//! An OS-level advisory lock on `<entry>/lock`, so that concurrent processes (and
//! threads holding their own handles) never compile the same key at once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::error::{LockAcquireSnafu, LockReleaseSnafu, Result};

/// Held build lock. Released explicitly with [`release`](Self::release) or on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: Option<File>,
    path: PathBuf,
}

impl BuildLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .context(LockAcquireSnafu { path: &path })?;
        file.lock().context(LockAcquireSnafu { path: &path })?;
        tracing::debug!(lock.path = %path.display(), "build lock acquired");

        Ok(Self { file: Some(file), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting failure.
    pub fn release(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => file.unlock().context(LockReleaseSnafu { path: &self.path }),
            None => Ok(()),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        // Closing the handle drops the lock as well; unlocking first just makes it prompt.
        if let Some(file) = self.file.take()
            && let Err(e) = file.unlock()
        {
            tracing::warn!(lock.path = %self.path.display(), error = %e, "failed to release build lock");
        }
    }
}

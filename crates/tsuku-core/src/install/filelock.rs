use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::FileExt;

/// Cross-process advisory lock over a sentinel file. `flock` on POSIX,
/// `LockFileEx` on Windows (both via fs4). Acquisition blocks; callers that
/// need a timeout cancel their own operation instead.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Acquires a shared (read) lock; multiple processes may hold one.
    ///
    /// # Errors
    /// Returns an error when the lock file cannot be opened or locked.
    pub fn lock_shared(&mut self) -> Result<()> {
        self.open_file()?
            .lock_shared()
            .with_context(|| format!("failed to lock {} (shared)", self.path.display()))
    }

    /// Acquires an exclusive (write) lock, blocking shared holders.
    ///
    /// # Errors
    /// Returns an error when the lock file cannot be opened or locked.
    pub fn lock_exclusive(&mut self) -> Result<()> {
        self.open_file()?
            .lock_exclusive()
            .with_context(|| format!("failed to lock {} (exclusive)", self.path.display()))
    }

    /// Releases the lock and closes the file. Double-unlock is a no-op.
    ///
    /// # Errors
    /// Returns an error when the OS refuses the unlock.
    pub fn unlock(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.unlock()
            .with_context(|| format!("failed to unlock {}", self.path.display()))
    }

    /// Convenience: a lock held in shared mode until dropped.
    ///
    /// # Errors
    /// Returns an error when acquisition fails.
    pub fn shared(path: impl Into<PathBuf>) -> Result<Self> {
        let mut lock = Self::new(path);
        lock.lock_shared()?;
        Ok(lock)
    }

    /// Convenience: a lock held in exclusive mode until dropped.
    ///
    /// # Errors
    /// Returns an error when acquisition fails.
    pub fn exclusive(path: impl Into<PathBuf>) -> Result<Self> {
        let mut lock = Self::new(path);
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn open_file(&mut self) -> Result<&File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = open_lock_file(&self.path)
                .with_context(|| format!("failed to open lock file {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file.as_ref().context("lock file not open")
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}

#[cfg(unix)]
fn open_lock_file(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
}

#[cfg(not(unix))]
fn open_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs4::FileExt as _;

    #[test]
    fn double_unlock_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut lock = FileLock::new(dir.path().join("state.lock"));
        lock.lock_exclusive().expect("lock");
        lock.unlock().expect("unlock");
        lock.unlock().expect("second unlock is fine");
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.lock");
        let _first = FileLock::shared(&path).expect("first shared");
        let _second = FileLock::shared(&path).expect("second shared");
    }

    #[test]
    fn exclusive_lock_blocks_other_holders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.lock");
        let held = FileLock::exclusive(&path).expect("exclusive");

        // A second handle on the same file cannot take the lock while the
        // first holds it.
        let probe = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .expect("open probe");
        assert!(probe.try_lock_exclusive().is_err());

        drop(held);
        probe.try_lock_exclusive().expect("lock after release");
        probe.unlock().expect("unlock probe");
    }

    #[test]
    fn lock_file_is_created_on_first_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.lock");
        let _lock = FileLock::shared(&path).expect("lock");
        assert!(path.exists());
    }
}

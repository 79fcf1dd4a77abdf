//! Cross-process advisory lock
//!
//! Work-queue pullers serialize their shared-tail advancement through
//! an exclusive `flock(2)` on a lock file derived from the segment
//! name. The lock is process-safe but not thread-safe within a single
//! process; threads must serialize externally.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::debug;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, ShmError};

/// Interval between acquisition retries in timed mode
const LOCK_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Directory holding lock files
fn lock_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Absolute path of the lock file guarding `name`
pub fn lock_path(name: &str) -> PathBuf {
    let safe = name.replace(['/', '\\'], "_");
    lock_dir().join(format!("shmcomm_{}.lock", safe))
}

/// A named cross-process advisory lock
///
/// Acquisition returns a [`FileLockGuard`] that releases on drop, on
/// every exit path including panics.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Create a lock handle for `name`, creating the lock file if needed
    pub fn new(name: &str) -> Result<Self> {
        let path = lock_path(name);
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| {
                ShmError::connection_io(
                    e,
                    &format!("failed to create lock file '{}'", path.display()),
                )
            })?;
        Ok(Self { path })
    }

    fn open(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                ShmError::connection_io(
                    e,
                    &format!("failed to open lock file '{}'", self.path.display()),
                )
            })
    }

    /// Acquire exclusively, blocking until the lock is available
    pub fn acquire(&self) -> Result<FileLockGuard> {
        let file = self.open()?;
        let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            ShmError::connection(format!(
                "failed to lock '{}': {}",
                self.path.display(),
                errno
            ))
        })?;
        Ok(FileLockGuard { _flock: flock })
    }

    /// Try to acquire without blocking; `None` when another process
    /// holds the lock
    pub fn try_acquire(&self) -> Result<Option<FileLockGuard>> {
        let file = self.open()?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(FileLockGuard { _flock: flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(ShmError::connection(format!(
                "failed to lock '{}': {}",
                self.path.display(),
                errno
            ))),
        }
    }

    /// Acquire exclusively, waiting at most `timeout`
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<FileLockGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                debug!("lock '{}' still contended after {:?}", self.path.display(), timeout);
                return Err(ShmError::timeout(
                    format!("could not acquire lock '{}'", self.path.display()),
                    timeout,
                ));
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Path of the backing lock file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Guard holding an exclusive lock; released on drop
#[derive(Debug)]
pub struct FileLockGuard {
    _flock: Flock<File>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_sanitizes_separators() {
        let path = lock_path("a/b\\c");
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(file, "shmcomm_a_b_c.lock");
    }

    #[test]
    fn test_acquire_release_reacquire() {
        let lock = FileLock::new("test_lock_rr").unwrap();
        let guard = lock.acquire().unwrap();
        drop(guard);
        // Released on drop, so a second acquisition succeeds at once.
        let _guard = lock.try_acquire().unwrap().unwrap();
    }

    #[test]
    fn test_timeout_when_contended() {
        // flock is per open file description, so holding the lock in
        // this process still blocks a second descriptor.
        let lock = FileLock::new("test_lock_timeout").unwrap();
        let _guard = lock.acquire().unwrap();

        let second = FileLock::new("test_lock_timeout").unwrap();
        let err = second
            .acquire_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ShmError::Timeout { .. }));
    }
}

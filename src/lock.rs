//! Cross-process advisory locks backed by `flock(2)`.
//!
//! A lock is identified by a path. The lock file is created on first use
//! and left in place afterwards; only the `flock` on it carries meaning.
//! The kernel drops the lock when the holding descriptor is closed, which
//! includes the holder crashing, so a dead holder never wedges other
//! processes.

use crate::error::{BenchError, Result};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Suffix of the lock file co-located with a locked file.
pub const LOCK_SUFFIX: &str = ".lock";

const POLL_INTERVAL_MIN: Duration = Duration::from_millis(1);
const POLL_INTERVAL_MAX: Duration = Duration::from_millis(50);

/// Lock file path for `target`: the same path with `.lock` appended.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Exclusive lock shared by every process that opens the same path.
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    path: PathBuf,
    timeout: Option<Duration>,
}

/// Held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl AdvisoryLock {
    /// Lock keyed by the lock file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: None,
        }
    }

    /// Lock guarding `target`, stored next to it as `<target>.lock`.
    pub fn for_file(target: &Path) -> Self {
        Self::new(lock_path_for(target))
    }

    /// Bound the wait in [`acquire`](Self::acquire). `None` blocks forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, blocking until it is free or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` when a timeout is configured and elapses, or an
    /// I/O error if the lock file cannot be created.
    pub fn acquire(&self) -> Result<LockGuard> {
        let file = self.open()?;
        let fd = file.as_raw_fd();

        let timeout = match self.timeout {
            None => {
                loop {
                    let ret = unsafe { libc::flock(fd, libc::LOCK_EX) };
                    if ret == 0 {
                        break;
                    }
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err.into());
                    }
                }
                return Ok(self.guard(file));
            }
            Some(timeout) => timeout,
        };

        let start = Instant::now();
        let mut backoff = POLL_INTERVAL_MIN;
        loop {
            if try_flock(&file)? {
                return Ok(self.guard(file));
            }
            let waited = start.elapsed();
            if waited >= timeout {
                tracing::debug!("Gave up on lock {:?} after {:?}", self.path, waited);
                return Err(BenchError::LockTimeout {
                    path: self.path.clone(),
                    waited,
                });
            }
            std::thread::sleep(backoff.min(timeout - waited));
            backoff = (backoff * 2).min(POLL_INTERVAL_MAX);
        }
    }

    /// Take the lock only if nobody holds it.
    ///
    /// Returns `Ok(None)` if another descriptor holds the lock.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let file = self.open()?;
        if try_flock(&file)? {
            Ok(Some(self.guard(file)))
        } else {
            Ok(None)
        }
    }

    fn open(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        Ok(file)
    }

    fn guard(&self, file: File) -> LockGuard {
        LockGuard {
            file,
            path: self.path.clone(),
        }
    }
}

/// Non-blocking exclusive `flock`. `Ok(false)` means someone else holds it.
fn try_flock(file: &File) -> Result<bool> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
        _ => Err(err.into()),
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the descriptor would release it as well.
        let ret = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if ret != 0 {
            tracing::warn!(
                "Failed to unlock {:?}: {}",
                self.path,
                io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/data/ab/cd_unit")),
            PathBuf::from("/data/ab/cd_unit.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("db.sqlite")),
            PathBuf::from("db.sqlite.lock")
        );
    }

    #[test]
    fn test_acquire_creates_lock_file() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("unit");
        let lock = AdvisoryLock::for_file(&target);

        let guard = lock.acquire().unwrap();
        assert!(temp_dir.path().join("unit.lock").exists());
        assert_eq!(guard.path(), lock.path());
    }

    #[test]
    fn test_held_lock_excludes_other_descriptors() {
        let temp_dir = TempDir::new().unwrap();
        let lock = AdvisoryLock::new(temp_dir.path().join("x.lock"));

        let guard = lock.acquire().unwrap();
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_timeout_is_retryable_error() {
        let temp_dir = TempDir::new().unwrap();
        let lock = AdvisoryLock::new(temp_dir.path().join("x.lock"));
        let _guard = lock.acquire().unwrap();

        let contender = lock.clone().with_timeout(Some(Duration::from_millis(30)));
        let start = Instant::now();
        let err = contender.acquire().unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, BenchError::LockTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timed_acquire_succeeds_when_released() {
        let temp_dir = TempDir::new().unwrap();
        let lock = AdvisoryLock::new(temp_dir.path().join("x.lock"));
        let guard = lock.acquire().unwrap();

        let contender = lock.clone().with_timeout(Some(Duration::from_secs(5)));
        let handle = thread::spawn(move || contender.acquire().map(|_| ()));

        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.lock");
        let inside = Arc::new(AtomicBool::new(false));
        let entries = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = AdvisoryLock::new(path.clone());
                let inside = inside.clone();
                let entries = entries.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let _guard = lock.acquire().unwrap();
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        entries.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(100));
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(entries.load(Ordering::SeqCst), 100);
    }
}

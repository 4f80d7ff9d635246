//! Error types for kvbench.
//!
//! This module defines all error types that can occur while opening a
//! backend, running a workload or supervising worker processes.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for kvbench operations.
///
/// This is a convenience alias for `Result<T, BenchError>`.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Error types for benchmark operations.
///
/// A missing key is never an error: backends return `Ok(None)` for it.
#[derive(Error, Debug)]
pub enum BenchError {
    /// I/O error from the operating system.
    ///
    /// This includes permission errors and a full disk. Fatal for the
    /// worker that hits it.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error reported by the SQLite engine behind the transactional backend.
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// Waiting for an advisory lock exceeded the configured timeout.
    #[error("Timed out after {waited:?} waiting for lock {path:?}")]
    LockTimeout {
        /// Path of the lock file
        path: PathBuf,
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// A unit file holds a record that cannot be decoded.
    #[error("Corrupted data in unit {file:?} at offset {offset}")]
    CorruptedData {
        /// Path to the unit file
        file: PathBuf,
        /// Byte offset of the bad record
        offset: u64,
    },

    /// Checksum verification of a unit record failed.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the record header
        expected: u32,
        /// Checksum computed from the record body
        actual: u32,
    },

    /// Record encoding or decoding failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A worker process could not be spawned or exited without a report.
    #[error("Worker {worker} failed: {reason}")]
    WorkerFailed {
        /// Index of the worker in the parallel pass
        worker: usize,
        /// Human readable failure description
        reason: String,
    },

    /// A worker process did not finish within its deadline.
    #[error("Worker {worker} did not finish within {timeout:?}")]
    WorkerTimeout {
        /// Index of the worker in the parallel pass
        worker: usize,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// A backend broke the get/put contract during a self-check.
    #[error("Backend contract violated: {0}")]
    ContractViolation(String),

    /// One or more workers of a parallel pass produced no result.
    #[error("{failed} of {total} workers failed")]
    WorkersFailed {
        /// Number of workers without a report
        failed: usize,
        /// Number of workers spawned
        total: usize,
    },

    /// JSON parsing or serialization failed.
    ///
    /// This covers suite files, worker jobs and worker reports.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BenchError {
    /// Returns `true` for lock-contention errors that a caller may retry.
    ///
    /// Advisory-lock timeouts and SQLite busy/locked conditions are
    /// retryable; filesystem, corruption and configuration errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BenchError::LockTimeout { .. } => true,
            BenchError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_is_retryable() {
        let err = BenchError::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
            waited: Duration::from_millis(10),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_sqlite_busy_is_retryable() {
        let err = BenchError::SqliteError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_error_is_fatal() {
        let err = BenchError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!err.is_retryable());
        assert!(!BenchError::ConfigError("bad".into()).is_retryable());
    }
}

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest supported shard depth: one hex pair per SHA-256 digest byte.
pub const MAX_SHARD_LEVELS: u32 = 32;

/// Default SQLite busy timeout in milliseconds (20s).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 20_000;

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Storage strategy under test and its options.
///
/// The configuration is created once by the driver and handed by value to
/// every worker, which opens its own backend instance from it.
///
/// - **InMemory**: process-local map, never shared between workers.
/// - **Sharded**: hash-sharded unit files guarded by advisory file locks.
/// - **Transactional**: one SQLite file relying on the engine's own locking.
///
/// # Example
///
/// ```
/// use kvbench::config::BackendConfig;
///
/// let config = BackendConfig::sharded("./data/sharded_l1", 1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Per-process in-memory map; the baseline.
    InMemory,
    /// Hash-sharded unit files with one advisory lock per unit.
    Sharded {
        /// Root directory of the shard tree.
        base_path: PathBuf,
        /// Shard depth; `0` keeps every key in a single unit.
        levels: u32,
        /// Give up waiting for a unit lock after this many milliseconds.
        /// Absent means block until the lock is acquired.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lock_timeout_ms: Option<u64>,
    },
    /// A single SQLite database file.
    Transactional {
        /// Path of the database file.
        path: PathBuf,
        /// Switch the database to write-ahead-log journal mode.
        #[serde(default)]
        use_wal: bool,
        /// How long SQLite waits on a locked database before failing.
        #[serde(default = "default_busy_timeout_ms")]
        busy_timeout_ms: u64,
    },
}

impl BackendConfig {
    /// Sharded configuration with blocking lock acquisition.
    pub fn sharded(base_path: impl Into<PathBuf>, levels: u32) -> Self {
        BackendConfig::Sharded {
            base_path: base_path.into(),
            levels,
            lock_timeout_ms: None,
        }
    }

    /// Transactional configuration with the default busy timeout.
    pub fn transactional(path: impl Into<PathBuf>, use_wal: bool) -> Self {
        BackendConfig::Transactional {
            path: path.into(),
            use_wal,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// Set the advisory lock timeout of a sharded configuration.
    ///
    /// Other variants are returned unchanged.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let BackendConfig::Sharded { lock_timeout_ms, .. } = &mut self {
            *lock_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        }
        self
    }

    /// Short variant name used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::InMemory => "in_memory",
            BackendConfig::Sharded { .. } => "sharded",
            BackendConfig::Transactional { .. } => "transactional",
        }
    }

    /// Path whose on-disk footprint reflects this backend's storage growth.
    pub fn storage_root(&self) -> Option<&Path> {
        match self {
            BackendConfig::InMemory => None,
            BackendConfig::Sharded { base_path, .. } => Some(base_path),
            BackendConfig::Transactional { path, .. } => Some(path),
        }
    }

    /// Validates the backend options.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a path is empty or the shard depth exceeds
    /// [`MAX_SHARD_LEVELS`].
    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::InMemory => Ok(()),
            BackendConfig::Sharded { base_path, levels, .. } => {
                if base_path.as_os_str().is_empty() {
                    return Err(BenchError::ConfigError(
                        "base_path cannot be empty".to_string(),
                    ));
                }
                if *levels > MAX_SHARD_LEVELS {
                    return Err(BenchError::ConfigError(format!(
                        "levels cannot exceed {}",
                        MAX_SHARD_LEVELS
                    )));
                }
                Ok(())
            }
            BackendConfig::Transactional { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(BenchError::ConfigError(
                        "path cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::InMemory => write!(f, "in_memory {{}}"),
            BackendConfig::Sharded { base_path, levels, lock_timeout_ms } => {
                write!(f, "sharded {{base_path: {}, levels: {}", base_path.display(), levels)?;
                if let Some(ms) = lock_timeout_ms {
                    write!(f, ", lock_timeout_ms: {}", ms)?;
                }
                write!(f, "}}")
            }
            BackendConfig::Transactional { path, use_wal, busy_timeout_ms } => write!(
                f,
                "transactional {{path: {}, use_wal: {}, busy_timeout_ms: {}}}",
                path.display(),
                use_wal,
                busy_timeout_ms
            ),
        }
    }
}

/// Workload and process-pool parameters for one benchmark run.
///
/// # Example
///
/// ```
/// use kvbench::config::BenchConfig;
///
/// let config = BenchConfig::default()
///     .with_parallelism(4)
///     .with_iterations(10_000);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Number of worker processes in the parallel pass (default: 8).
    pub parallelism: usize,

    /// Operations per worker in the parallel pass (default: 50 000).
    pub iterations: u64,

    /// Inclusive upper bound of the sampled key space (default: 100 000).
    pub key_range: u64,

    /// Inclusive lower bound of the sampled key space (default: 0).
    pub first_key: u64,

    /// Operations of the single-process preload pass (default: 20 000).
    pub preload: u64,

    /// Log progress every this many iterations; `0` disables it (default: 5 000).
    pub progress_interval: u64,

    /// Worker that logs progress (default: 1).
    pub progress_worker: Option<usize>,

    /// Kill a worker that has not reported after this many seconds
    /// (default: 1 800). `None` waits forever.
    pub worker_timeout_secs: Option<u64>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            iterations: 50_000,
            key_range: 100_000,
            first_key: 0,
            preload: 20_000,
            progress_interval: 5_000,
            progress_worker: Some(1),
            worker_timeout_secs: Some(1_800),
        }
    }
}

impl BenchConfig {
    /// Validates the run parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `parallelism` is zero
    /// - `first_key` is greater than `key_range`
    /// - `worker_timeout_secs` is `Some(0)`
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(BenchError::ConfigError(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.first_key > self.key_range {
            return Err(BenchError::ConfigError(format!(
                "first_key ({}) cannot exceed key_range ({})",
                self.first_key, self.key_range
            )));
        }
        if self.worker_timeout_secs == Some(0) {
            return Err(BenchError::ConfigError(
                "worker_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-worker deadline, if any.
    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }

    /// Set the number of worker processes
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the per-worker iteration count
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the sampled key space `[first_key, key_range]`
    pub fn with_key_space(mut self, first_key: u64, key_range: u64) -> Self {
        self.first_key = first_key;
        self.key_range = key_range;
        self
    }

    /// Set the preload iteration count
    pub fn with_preload(mut self, preload: u64) -> Self {
        self.preload = preload;
        self
    }

    /// Set progress reporting cadence and the reporting worker
    pub fn with_progress(mut self, interval: u64, worker: Option<usize>) -> Self {
        self.progress_interval = interval;
        self.progress_worker = worker;
        self
    }

    /// Set the per-worker timeout
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }
}

/// A list of backend configurations benchmarked one after another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    #[serde(default)]
    pub bench: BenchConfig,
    pub backends: Vec<BackendConfig>,
}

impl SuiteConfig {
    /// The six reference configurations, rooted at `data_dir`.
    ///
    /// In-memory baseline, sharded units at depth 0, 1 and 2, and a single
    /// SQLite file with and without write-ahead logging.
    pub fn reference(data_dir: &Path) -> Self {
        Self {
            bench: BenchConfig::default(),
            backends: vec![
                BackendConfig::InMemory,
                BackendConfig::sharded(data_dir.join("sharded_l0"), 0),
                BackendConfig::sharded(data_dir.join("sharded_l1"), 1),
                BackendConfig::sharded(data_dir.join("sharded_l2"), 2),
                BackendConfig::transactional(
                    data_dir.join("sqlite_single").join("single.sqlite"),
                    false,
                ),
                BackendConfig::transactional(
                    data_dir.join("sqlite_single_wal").join("single.sqlite"),
                    true,
                ),
            ],
        }
    }

    /// Load a suite from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let suite: SuiteConfig = serde_json::from_str(&json)?;
        suite.validate()?;
        Ok(suite)
    }

    /// Write the suite to a JSON file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bench.validate()?;
        if self.backends.is_empty() {
            return Err(BenchError::ConfigError(
                "suite must list at least one backend".to_string(),
            ));
        }
        for backend in &self.backends {
            backend.validate()?;
        }
        Ok(())
    }
}

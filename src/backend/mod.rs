//! Interchangeable key/value storage strategies.
//!
//! Every strategy implements [`Backend`]. The closed set of strategies is
//! [`AnyBackend`], selected from a [`BackendConfig`] at startup.

pub mod memory;
pub mod sharded;
pub mod transactional;

use crate::config::BackendConfig;
use crate::error::{BenchError, Result};
use std::time::Duration;

pub use memory::InMemoryBackend;
pub use sharded::ShardedLockedFileBackend;
pub use transactional::TransactionalSingleFileBackend;

/// Uniform get/put surface over a storage strategy.
///
/// # Contract
///
/// - `get` of a key that was never written returns `Ok(None)`.
/// - After `put(k, v)` returns, any instance reaching the same storage
///   unit observes `v` for `k` until a later `put` overwrites it
///   (last writer wins, no conflict detection).
/// - Values come back byte-for-byte as written.
pub trait Backend {
    fn get(&mut self, key: &str) -> Result<Option<String>>;

    fn put(&mut self, key: &str, value: &str) -> Result<()>;
}

/// A backend instance of any configured strategy.
pub enum AnyBackend {
    InMemory(InMemoryBackend),
    Sharded(ShardedLockedFileBackend),
    Transactional(TransactionalSingleFileBackend),
}

impl AnyBackend {
    /// Open a backend instance for `config`.
    ///
    /// Each worker process calls this once; instances are never shared
    /// between processes.
    pub fn open(config: &BackendConfig) -> Result<Self> {
        config.validate()?;

        let backend = match config {
            BackendConfig::InMemory => AnyBackend::InMemory(InMemoryBackend::new()),
            BackendConfig::Sharded {
                base_path,
                levels,
                lock_timeout_ms,
            } => AnyBackend::Sharded(
                ShardedLockedFileBackend::new(base_path.clone(), *levels)
                    .with_lock_timeout(lock_timeout_ms.map(Duration::from_millis)),
            ),
            BackendConfig::Transactional {
                path,
                use_wal,
                busy_timeout_ms,
            } => AnyBackend::Transactional(TransactionalSingleFileBackend::open(
                path,
                *use_wal,
                Duration::from_millis(*busy_timeout_ms),
            )?),
        };

        tracing::debug!("Opened {} backend", config.kind());
        Ok(backend)
    }
}

impl Backend for AnyBackend {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self {
            AnyBackend::InMemory(backend) => backend.get(key),
            AnyBackend::Sharded(backend) => backend.get(key),
            AnyBackend::Transactional(backend) => backend.get(key),
        }
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        match self {
            AnyBackend::InMemory(backend) => backend.put(key, value),
            AnyBackend::Sharded(backend) => backend.put(key, value),
            AnyBackend::Transactional(backend) => backend.put(key, value),
        }
    }
}

/// Check the [`Backend`] contract against a fresh instance.
///
/// `unseen_key` must be a key that has never been written to the store.
pub fn check_contract<B: Backend + ?Sized>(backend: &mut B, unseen_key: &str) -> Result<()> {
    if let Some(found) = backend.get(unseen_key)? {
        return Err(BenchError::ContractViolation(format!(
            "unseen key {:?} returned {:?}",
            unseen_key, found
        )));
    }

    for value in ["def", "ghi"] {
        backend.put(unseen_key, value)?;
        let found = backend.get(unseen_key)?;
        if found.as_deref() != Some(value) {
            return Err(BenchError::ContractViolation(format!(
                "expected {:?} after put, got {:?}",
                value, found
            )));
        }
    }

    Ok(())
}

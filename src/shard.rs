//! Deterministic key to unit-file routing for the sharded backend.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File name of the only unit when sharding is disabled (`levels == 0`).
pub const SINGLE_UNIT_NAME: &str = "single.unit";

/// Suffix appended to the last hex segment to form a unit file name.
pub const UNIT_SUFFIX: &str = "_unit";

/// Maps keys to unit files below a base directory.
///
/// The key's SHA-256 digest supplies one lower-case hex pair per level.
/// All but the last pair become directories, the last one names the unit:
///
/// ```text
/// levels = 0   <base>/single.unit
/// levels = 1   <base>/3f_unit
/// levels = 2   <base>/3f/a9_unit
/// ```
///
/// Routing is a pure function of `(key, levels, base_path)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRouter {
    base_path: PathBuf,
    levels: u32,
}

impl ShardRouter {
    pub fn new(base_path: impl Into<PathBuf>, levels: u32) -> Self {
        Self {
            base_path: base_path.into(),
            levels,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Path of the unit file holding `key`.
    pub fn unit_path(&self, key: &str) -> PathBuf {
        if self.levels == 0 {
            return self.base_path.join(SINGLE_UNIT_NAME);
        }

        let digest = Sha256::digest(key.as_bytes());
        let segments: Vec<String> = digest
            .iter()
            .take(self.levels as usize)
            .map(|byte| format!("{:02x}", byte))
            .collect();

        let mut path = self.base_path.clone();
        let (last, dirs) = match segments.split_last() {
            Some(split) => split,
            None => return self.base_path.join(SINGLE_UNIT_NAME),
        };
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{}{}", last, UNIT_SUFFIX));
        path
    }

    /// Number of distinct unit files this router can produce.
    ///
    /// `None` when the count does not fit in a `u64`.
    pub fn unit_count(&self) -> Option<u64> {
        16u64.checked_pow(2 * self.levels)
    }
}

use super::Backend;
use crate::error::Result;
use crate::lock::AdvisoryLock;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const TABLE_EXISTS_SQL: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'kv'";
const CREATE_SCHEMA_SQL: &str = "BEGIN;
     CREATE TABLE kv (k TEXT, v TEXT);
     CREATE UNIQUE INDEX k_uniq ON kv (k);
     COMMIT;";
const GET_SQL: &str = "SELECT v FROM kv WHERE k = ?1";
const UPSERT_SQL: &str =
    "INSERT INTO kv (k, v) VALUES (?1, ?2) ON CONFLICT (k) DO UPDATE SET v = excluded.v";

/// One SQLite file shared by all workers.
///
/// Concurrency control is left to SQLite's own locking and journal. The
/// only external lock is taken while bootstrapping the schema: SQLite does
/// not write a new database file until the first commit, so two processes
/// creating it at once could both see an empty schema.
///
/// Each instance keeps one connection for its lifetime and commits every
/// put as its own transaction.
pub struct TransactionalSingleFileBackend {
    path: PathBuf,
    conn: Connection,
}

impl TransactionalSingleFileBackend {
    /// Open (and if needed create) the database at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Database file; parent directories are created
    /// * `use_wal` - Switch the database to `journal_mode=WAL`
    /// * `busy_timeout` - How long SQLite waits on a locked database
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap lock, the connection or the schema
    /// creation fails.
    pub fn open(path: &Path, use_wal: bool, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let _bootstrap = AdvisoryLock::for_file(path).acquire()?;

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        if use_wal {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!("Journal mode for {:?}: {}", path, mode);
        }

        let tables: i64 = conn.query_row(TABLE_EXISTS_SQL, [], |row| row.get(0))?;
        if tables == 0 {
            tracing::info!("Creating kv schema in {:?}", path);
            conn.execute_batch(CREATE_SCHEMA_SQL)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current journal mode reported by SQLite (e.g. `wal`, `delete`).
    pub fn journal_mode(&self) -> Result<String> {
        let mode = self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

impl Backend for TransactionalSingleFileBackend {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(GET_SQL)?;
        let value = stmt
            .query_row(params![key], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(UPSERT_SQL)?;
        stmt.execute(params![key, value])?;
        Ok(())
    }
}

// Job store: SQLite database plus the on-disk job directory tree.
// Owns all persistent state; the coordinator holds the only handle during a job.

mod checkpoints;
mod chunks;
mod jobs;
mod migrations;

pub use chunks::ChunkUpsert;
pub use jobs::ReadyJobSummary;

use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::paths::AppPaths;

/// Store that owns the SQLite connection and the job directories.
pub struct Store {
    conn: Mutex<Connection>,
    paths: AppPaths,
}

impl Store {
    /// Open (or create) the database under the given root and bring the
    /// schema up to date.
    pub fn open(paths: AppPaths) -> Result<Self> {
        let db_path = paths.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        migrations::run_migrations(&conn)?;

        log::info!("Job store initialized at: {:?}", db_path);

        Ok(Self {
            conn: Mutex::new(conn),
            paths,
        })
    }

    /// Execute a function with access to the database connection.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("database lock poisoned: {}", e),
            ))
        })?;
        f(&conn)
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn db_path(&self) -> PathBuf {
        self.paths.db_path()
    }
}

/// RFC3339 timestamp used for all row stamps.
pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = Store::open(AppPaths::new(dir.path())).unwrap();
        assert!(store.db_path().exists());

        store
            .with_connection(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        {
            Store::open(AppPaths::new(dir.path())).unwrap();
        }
        // A second open must not re-run migrations destructively.
        let store = Store::open(AppPaths::new(dir.path())).unwrap();
        store
            .with_connection(|conn| {
                let version: i64 =
                    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
                assert_eq!(version, 2);
                Ok(())
            })
            .unwrap();
    }
}

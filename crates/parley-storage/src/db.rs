//! SQLite handle for the record sink.
//!
//! One connection behind a mutex. The record writer is the only hot caller,
//! so there is no pool. File and in-memory databases share the same setup.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

use crate::migrations;

/// WAL suits one writer with occasional readers; ignored for in-memory databases.
const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
                       PRAGMA synchronous = NORMAL;
                       PRAGMA foreign_keys = ON;";

fn storage_error(context: &str, err: rusqlite::Error) -> ParleyError {
    ParleyError::Storage(format!("{}: {}", context, err))
}

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file, creating parent directories.
    pub fn new(path: &Path) -> Result<Self, ParleyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| storage_error("Failed to open database", e))?;
        let db = Self::init(conn)?;
        info!(path = %path.display(), "Record database ready");
        Ok(db)
    }

    /// Private database that disappears on drop.
    pub fn in_memory() -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage_error("Failed to open in-memory database", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ParleyError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| storage_error("Failed to set pragmas", e))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ParleyError::Storage("Database lock poisoned".to_string()))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use parley_core::config::StorageConfig;
use parley_core::error::ParleyError;

use crate::migrations;

/// Names of the two tables Parley owns.
///
/// Both come from configuration and must already have passed
/// `ParleyConfig::validate`, since they are interpolated into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// One row per user holding the latest turn index.
    pub index: String,
    /// Append-only conversation log entries.
    pub conversation: String,
}

impl TableNames {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            index: config.index_table.clone(),
            conversation: config.conversation_table.clone(),
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not
/// Sync.
pub struct Database {
    conn: Mutex<Connection>,
    tables: TableNames,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, a busy timeout for other
    /// processes sharing the file, and runs all pending migrations.
    pub fn new(path: &Path, tables: TableNames) -> Result<Self, ParleyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ParleyError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
            tables,
        };
        db.with_conn(|conn| migrations::run_migrations(conn, &db.tables))?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(tables: TableNames) -> Result<Self, ParleyError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ParleyError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
            tables,
        };
        db.with_conn(|conn| migrations::run_migrations(conn, &db.tables))?;

        Ok(db)
    }

    /// Table names this database was migrated with.
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ParleyError>
    where
        F: FnOnce(&Connection) -> Result<T, ParleyError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ParleyError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.tables)
            .finish()
    }
}

//! Database schema migrations.
//!
//! Table names are configurable, so versions are tracked per table rather
//! than per database: renaming a table in config migrates the new name from
//! scratch and leaves the old table untouched.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

use crate::db::TableNames;

/// Run all pending migrations for the configured tables.
pub fn run_migrations(conn: &Connection, tables: &TableNames) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            table_name  TEXT NOT NULL,
            version     INTEGER NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (table_name, version)
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    if current_version(conn, &tables.index)? < 1 {
        apply_index_v1(conn, &tables.index)?;
        info!(table = %tables.index, "Applied migration v1: session index");
    }

    if current_version(conn, &tables.conversation)? < 1 {
        apply_conversation_v1(conn, &tables.conversation)?;
        info!(table = %tables.conversation, "Applied migration v1: conversation log");
    }

    Ok(())
}

fn current_version(conn: &Connection, table: &str) -> Result<i64, ParleyError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations WHERE table_name = ?1",
        rusqlite::params![table],
        |row| row.get(0),
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1 of the session index: one row per user.
fn apply_index_v1(conn: &Connection, table: &str) -> Result<(), ParleyError> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id          TEXT PRIMARY KEY NOT NULL,
            chat_index  INTEGER NOT NULL CHECK (chat_index >= 0),
            updated_at  TEXT NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (table_name, version) VALUES ('{table}', 1);
        ",
        table = table
    ))
    .map_err(|e| ParleyError::Storage(format!("Failed to migrate {}: {}", table, e)))
}

/// Version 1 of the conversation log: `seq` fixes insertion order.
fn apply_conversation_v1(conn: &Connection, table: &str) -> Result<(), ParleyError> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            session_id  TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            text        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_{table}_session
            ON {table} (session_id, seq ASC);

        INSERT OR IGNORE INTO schema_migrations (table_name, version) VALUES ('{table}', 1);
        ",
        table = table
    ))
    .map_err(|e| ParleyError::Storage(format!("Failed to migrate {}: {}", table, e)))
}

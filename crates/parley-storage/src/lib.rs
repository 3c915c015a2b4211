//! Parley storage crate - SQLite persistence for turn indexes and logs.
//!
//! Provides a WAL-mode SQLite database with per-table migrations, the
//! compare-and-swap session index store, and the append-only conversation
//! log store.

pub mod conversation_log;
pub mod db;
pub mod migrations;
pub mod session_index;

pub use conversation_log::{ConversationLogRepository, ConversationLogStore};
pub use db::{Database, TableNames};
pub use session_index::{SessionIndexRepository, SessionIndexStore};

use chrono::{DateTime, Utc};

use parley_core::error::ParleyError;

/// Parse an RFC 3339 column value into a UTC timestamp.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParleyError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ParleyError::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Extension trait for rusqlite to support optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

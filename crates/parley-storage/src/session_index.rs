//! Per-user turn index store.
//!
//! Holds one row per user with the highest turn index handed out so far.
//! Writes are compare-and-swap on the previous value so two concurrent
//! turns for the same user can never both claim the same index.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use parley_core::error::ParleyError;
use parley_core::types::SessionIndexRecord;

use crate::db::Database;
use crate::{parse_timestamp, OptionalExt};

/// Durable mapping from user id to latest turn index.
pub trait SessionIndexStore: Send + Sync {
    /// Current record for `user_id`, or `None` if the user has never chatted.
    fn get(&self, user_id: &str) -> Result<Option<SessionIndexRecord>, ParleyError>;

    /// Set the turn index to `new` only if it currently equals `expected`.
    ///
    /// A missing row counts as `expected == 0`. Returns `Ok(false)` when the
    /// stored value has moved on (the caller lost a race).
    fn compare_and_set(
        &self,
        user_id: &str,
        expected: u64,
        new: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, ParleyError>;
}

/// SQLite-backed [`SessionIndexStore`].
pub struct SessionIndexRepository {
    db: Arc<Database>,
    table: String,
}

impl SessionIndexRepository {
    pub fn new(db: Arc<Database>) -> Self {
        let table = db.tables().index.clone();
        Self { db, table }
    }

    /// Number of users with a record.
    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                    row.get(0)
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

impl SessionIndexStore for SessionIndexRepository {
    fn get(&self, user_id: &str) -> Result<Option<SessionIndexRecord>, ParleyError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT id, chat_index, updated_at FROM {} WHERE id = ?1",
                        self.table
                    ),
                    rusqlite::params![user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| ParleyError::Storage(format!("Failed to read turn index: {}", e)))?;

            match row {
                Some((id, chat_index, updated_at)) => Ok(Some(SessionIndexRecord {
                    user_id: id,
                    turn_index: u64::try_from(chat_index).map_err(|_| {
                        ParleyError::Storage(format!("Negative turn index {}", chat_index))
                    })?,
                    updated_at: parse_timestamp(&updated_at)?,
                })),
                None => Ok(None),
            }
        })
    }

    fn compare_and_set(
        &self,
        user_id: &str,
        expected: u64,
        new: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, ParleyError> {
        if new < expected {
            return Err(ParleyError::Storage(format!(
                "Turn index for {} cannot move backwards ({} -> {})",
                user_id, expected, new
            )));
        }
        let new_i64 = i64::try_from(new)
            .map_err(|_| ParleyError::Storage(format!("Turn index {} out of range", new)))?;
        let expected_i64 = i64::try_from(expected)
            .map_err(|_| ParleyError::Storage(format!("Turn index {} out of range", expected)))?;
        let stamp = updated_at.to_rfc3339();

        self.db.with_conn(|conn| {
            let changed = if expected == 0 {
                // Absent row and explicit zero both mean "no turns yet".
                conn.execute(
                    &format!(
                        "INSERT INTO {t} (id, chat_index, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE
                            SET chat_index = excluded.chat_index,
                                updated_at = excluded.updated_at
                            WHERE {t}.chat_index = 0",
                        t = self.table
                    ),
                    rusqlite::params![user_id, new_i64, stamp],
                )
            } else {
                conn.execute(
                    &format!(
                        "UPDATE {} SET chat_index = ?2, updated_at = ?3
                         WHERE id = ?1 AND chat_index = ?4",
                        self.table
                    ),
                    rusqlite::params![user_id, new_i64, stamp, expected_i64],
                )
            }
            .map_err(|e| ParleyError::Storage(format!("Failed to write turn index: {}", e)))?;

            Ok(changed == 1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableNames;

    fn make_repo() -> SessionIndexRepository {
        SessionIndexRepository::new(Arc::new(Database::in_memory(TableNames::default()).unwrap()))
    }

    #[test]
    fn test_get_missing_user() {
        let repo = make_repo();
        assert!(repo.get("nobody").unwrap().is_none());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_first_write_from_zero() {
        let repo = make_repo();
        let now = Utc::now();
        assert!(repo.compare_and_set("alice", 0, 1, now).unwrap());

        let record = repo.get("alice").unwrap().unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.turn_index, 1);
        assert_eq!(record.updated_at.timestamp(), now.timestamp());
    }

    #[test]
    fn test_sequential_advances() {
        let repo = make_repo();
        for expected in 0..5u64 {
            assert!(repo
                .compare_and_set("alice", expected, expected + 1, Utc::now())
                .unwrap());
        }
        assert_eq!(repo.get("alice").unwrap().unwrap().turn_index, 5);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_stale_expected_value_is_rejected() {
        let repo = make_repo();
        assert!(repo.compare_and_set("alice", 0, 1, Utc::now()).unwrap());

        // A second writer that also read 0 must lose.
        assert!(!repo.compare_and_set("alice", 0, 1, Utc::now()).unwrap());
        // So must one holding any other stale value.
        assert!(!repo.compare_and_set("alice", 3, 4, Utc::now()).unwrap());

        assert_eq!(repo.get("alice").unwrap().unwrap().turn_index, 1);
    }

    #[test]
    fn test_update_requires_existing_row() {
        let repo = make_repo();
        assert!(!repo.compare_and_set("bob", 2, 3, Utc::now()).unwrap());
        assert!(repo.get("bob").unwrap().is_none());
    }

    #[test]
    fn test_backwards_write_is_an_error() {
        let repo = make_repo();
        repo.compare_and_set("alice", 0, 1, Utc::now()).unwrap();
        assert!(repo.compare_and_set("alice", 1, 0, Utc::now()).is_err());
    }

    #[test]
    fn test_users_are_independent() {
        let repo = make_repo();
        repo.compare_and_set("alice", 0, 1, Utc::now()).unwrap();
        repo.compare_and_set("alice", 1, 2, Utc::now()).unwrap();
        repo.compare_and_set("bob", 0, 1, Utc::now()).unwrap();

        assert_eq!(repo.get("alice").unwrap().unwrap().turn_index, 2);
        assert_eq!(repo.get("bob").unwrap().unwrap().turn_index, 1);
    }

    #[test]
    fn test_updated_at_is_rfc3339_in_table() {
        let db = Arc::new(Database::in_memory(TableNames::default()).unwrap());
        let repo = SessionIndexRepository::new(Arc::clone(&db));
        repo.compare_and_set("alice", 0, 1, Utc::now()).unwrap();

        let raw: String = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT updated_at FROM conversation_index WHERE id = 'alice'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))
            })
            .unwrap();
        assert!(DateTime::parse_from_rfc3339(&raw).is_ok());
    }
}

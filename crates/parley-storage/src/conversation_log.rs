//! Append-only conversation log keyed by session id.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::{ConversationMessage, Role, SessionId};

use crate::db::Database;
use crate::parse_timestamp;

/// Durable per-session message sequence.
pub trait ConversationLogStore: Send + Sync {
    /// Append one message. There is no deduplication key: calling twice
    /// records two entries.
    fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        text: &str,
    ) -> Result<ConversationMessage, ParleyError>;

    /// All messages for a session in insertion order. An unknown session
    /// yields an empty history.
    fn load(&self, session_id: &SessionId) -> Result<Vec<ConversationMessage>, ParleyError>;
}

/// SQLite-backed [`ConversationLogStore`].
pub struct ConversationLogRepository {
    db: Arc<Database>,
    table: String,
}

impl ConversationLogRepository {
    pub fn new(db: Arc<Database>) -> Self {
        let table = db.tables().conversation.clone();
        Self { db, table }
    }

    /// Number of messages recorded for a session.
    pub fn count(&self, session_id: &SessionId) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {} WHERE session_id = ?1", self.table),
                    rusqlite::params![session_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

impl ConversationLogStore for ConversationLogRepository {
    fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        text: &str,
    ) -> Result<ConversationMessage, ParleyError> {
        let message = ConversationMessage {
            id: Uuid::new_v4(),
            session_id: session_id.clone(),
            role,
            text: text.to_string(),
            created_at: Utc::now(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, session_id, role, text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.table
                ),
                rusqlite::params![
                    message.id.to_string(),
                    message.session_id.as_str(),
                    message.role.as_str(),
                    message.text,
                    message.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to append message: {}", e)))?;
            Ok(())
        })?;

        Ok(message)
    }

    fn load(&self, session_id: &SessionId) -> Result<Vec<ConversationMessage>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id, session_id, role, text, created_at
                     FROM {}
                     WHERE session_id = ?1
                     ORDER BY seq ASC",
                    self.table
                ))
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![session_id.as_str()], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let message = row.map_err(|e| ParleyError::Storage(e.to_string()))??;
                messages.push(message);
            }
            Ok(messages)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ConversationMessage, ParleyError> {
    let get_text = |idx: usize| -> Result<String, ParleyError> {
        row.get(idx).map_err(|e| ParleyError::Storage(e.to_string()))
    };

    let id = get_text(0)?;
    let session_id = get_text(1)?;
    let role = get_text(2)?;
    let text = get_text(3)?;
    let created_at = get_text(4)?;

    Ok(ConversationMessage {
        id: Uuid::parse_str(&id)
            .map_err(|e| ParleyError::Storage(format!("Invalid UUID: {}", e)))?,
        session_id: SessionId(session_id),
        role: Role::parse(&role)
            .ok_or_else(|| ParleyError::Storage(format!("Unknown role '{}'", role)))?,
        text,
        created_at: parse_timestamp(&created_at)?,
    })
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between the user id and the turn index in a session id.
pub const SESSION_ID_SEPARATOR: &str = "-";

// =============================================================================
// Enums
// =============================================================================

/// Author of a conversation log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person talking to the bot.
    User,
    /// The model-generated reply.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse the stored column value back into a role.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Key naming a single turn's conversation log: `{user_id}-{turn_index}`.
///
/// Uniqueness per (user, turn) relies on the turn index never repeating for
/// a user, which the session index store guarantees.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn for_turn(user_id: &str, turn_index: u64) -> Self {
        Self(format!("{}{}{}", user_id, SESSION_ID_SEPARATOR, turn_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Entity Structs
// =============================================================================

/// Highest turn index handed out for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIndexRecord {
    pub user_id: String,
    pub turn_index: u64,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A document excerpt returned by the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub excerpt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

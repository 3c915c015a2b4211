//! Turn-indexed session resolution.
//!
//! Every inbound utterance opens a fresh conversation log: the user's turn
//! index is advanced by one and the log is keyed by `{user_id}-{turn_index}`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use parley_core::types::{ConversationMessage, Role, SessionId};
use parley_storage::{ConversationLogStore, SessionIndexStore};

use crate::error::ChatError;

/// Outcome of advancing a user's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    /// Index read before advancing (0 for a first-time user).
    pub previous_index: u64,
    /// Index just claimed.
    pub turn_index: u64,
    pub session_id: SessionId,
}

/// Owns read-modify-write access to the session index.
pub struct SessionManager {
    index: Arc<dyn SessionIndexStore>,
    max_attempts: u32,
}

impl SessionManager {
    pub fn new(index: Arc<dyn SessionIndexStore>, max_attempts: u32) -> Self {
        Self {
            index,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claim the next turn index for `user_id`.
    ///
    /// A lost compare-and-swap re-reads and tries again; store errors are
    /// returned immediately as [`ChatError::StorageUnavailable`].
    pub fn resolve_and_advance(&self, user_id: &str) -> Result<ResolvedSession, ChatError> {
        if user_id.trim().is_empty() {
            return Err(ChatError::MissingIdentity);
        }

        for attempt in 1..=self.max_attempts {
            let previous_index = self
                .index
                .get(user_id)?
                .map(|record| record.turn_index)
                .unwrap_or(0);
            let turn_index = previous_index + 1;

            if self
                .index
                .compare_and_set(user_id, previous_index, turn_index, Utc::now())?
            {
                let session_id = SessionId::for_turn(user_id, turn_index);
                debug!(user_id, turn_index, %session_id, "Turn index advanced");
                return Ok(ResolvedSession {
                    previous_index,
                    turn_index,
                    session_id,
                });
            }

            warn!(user_id, attempt, previous_index, "Turn index changed concurrently, retrying");
        }

        Err(ChatError::TurnConflict {
            user_id: user_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// Thin accessor over the conversation log store.
pub struct ConversationLog {
    store: Arc<dyn ConversationLogStore>,
}

impl ConversationLog {
    pub fn new(store: Arc<dyn ConversationLogStore>) -> Self {
        Self { store }
    }

    /// Record one message. Call at most once per logical message.
    pub fn append_message(
        &self,
        session_id: &SessionId,
        role: Role,
        text: &str,
    ) -> Result<ConversationMessage, ChatError> {
        Ok(self.store.append(session_id, role, text)?)
    }

    /// Messages for a session in insertion order.
    pub fn load_history(&self, session_id: &SessionId) -> Result<Vec<ConversationMessage>, ChatError> {
        Ok(self.store.load(session_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    use chrono::DateTime;
    use parley_core::error::ParleyError;
    use parley_core::types::SessionIndexRecord;
    use parley_storage::{
        ConversationLogRepository, Database, SessionIndexRepository, TableNames,
    };

    fn sqlite_manager() -> SessionManager {
        let db = Arc::new(Database::in_memory(TableNames::default()).unwrap());
        SessionManager::new(Arc::new(SessionIndexRepository::new(db)), 5)
    }

    /// Index store that always reports a lost race.
    struct AlwaysConflicting {
        attempts: AtomicU32,
    }

    impl SessionIndexStore for AlwaysConflicting {
        fn get(&self, _user_id: &str) -> Result<Option<SessionIndexRecord>, ParleyError> {
            Ok(None)
        }

        fn compare_and_set(
            &self,
            _user_id: &str,
            _expected: u64,
            _new: u64,
            _updated_at: DateTime<Utc>,
        ) -> Result<bool, ParleyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    /// Index store whose backend is gone.
    struct Unreachable;

    impl SessionIndexStore for Unreachable {
        fn get(&self, _user_id: &str) -> Result<Option<SessionIndexRecord>, ParleyError> {
            Err(ParleyError::Storage("connection refused".to_string()))
        }

        fn compare_and_set(
            &self,
            _user_id: &str,
            _expected: u64,
            _new: u64,
            _updated_at: DateTime<Utc>,
        ) -> Result<bool, ParleyError> {
            Err(ParleyError::Storage("connection refused".to_string()))
        }
    }

    #[test]
    fn test_first_turn_goes_from_zero_to_one() {
        let manager = sqlite_manager();
        let resolved = manager.resolve_and_advance("alice").unwrap();
        assert_eq!(resolved.previous_index, 0);
        assert_eq!(resolved.turn_index, 1);
        assert_eq!(resolved.session_id.as_str(), "alice-1");
    }

    #[test]
    fn test_sequential_turns_increase_by_one() {
        let manager = sqlite_manager();
        for expected in 1..=10u64 {
            let resolved = manager.resolve_and_advance("alice").unwrap();
            assert_eq!(resolved.previous_index, expected - 1);
            assert_eq!(resolved.turn_index, expected);
            assert_eq!(resolved.session_id, SessionId::for_turn("alice", expected));
        }
    }

    #[test]
    fn test_blank_user_is_missing_identity() {
        let manager = sqlite_manager();
        assert!(matches!(
            manager.resolve_and_advance("  "),
            Err(ChatError::MissingIdentity)
        ));
    }

    #[test]
    fn test_conflict_exhausts_attempts() {
        let store = Arc::new(AlwaysConflicting {
            attempts: AtomicU32::new(0),
        });
        let manager = SessionManager::new(store.clone(), 3);
        let err = manager.resolve_and_advance("alice").unwrap_err();
        assert!(matches!(err, ChatError::TurnConflict { attempts: 3, .. }));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unreachable_store_is_storage_unavailable() {
        let manager = SessionManager::new(Arc::new(Unreachable), 5);
        let err = manager.resolve_and_advance("alice").unwrap_err();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));
    }

    #[test]
    fn test_concurrent_turns_get_distinct_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("race.db"), TableNames::default()).unwrap());
        let manager = Arc::new(SessionManager::new(
            Arc::new(SessionIndexRepository::new(db)),
            50,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.resolve_and_advance("alice").unwrap().turn_index)
            })
            .collect();

        let mut indexes: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indexes.sort_unstable();
        assert_eq!(indexes, (1..=8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_alice_two_turn_scenario() {
        let db = Arc::new(Database::in_memory(TableNames::default()).unwrap());
        let manager = SessionManager::new(Arc::new(SessionIndexRepository::new(Arc::clone(&db))), 5);
        let log = ConversationLog::new(Arc::new(ConversationLogRepository::new(db)));

        let first = manager.resolve_and_advance("alice").unwrap();
        assert_eq!((first.previous_index, first.turn_index), (0, 1));
        assert_eq!(first.session_id.as_str(), "alice-1");
        log.append_message(&first.session_id, Role::User, "first question")
            .unwrap();
        log.append_message(&first.session_id, Role::Assistant, "first answer")
            .unwrap();

        let second = manager.resolve_and_advance("alice").unwrap();
        assert_eq!((second.previous_index, second.turn_index), (1, 2));
        assert_eq!(second.session_id.as_str(), "alice-2");
        log.append_message(&second.session_id, Role::User, "second question")
            .unwrap();

        let history = log.load_history(&first.session_id).unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first question", "first answer"]);
    }
}

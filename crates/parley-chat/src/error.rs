//! Error types for the conversational handler.

use parley_core::error::ParleyError;

/// Errors from a single dialog turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The session index or conversation log could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    /// The document search index failed or was unreachable.
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
    /// The hosted model failed or returned an unusable body.
    #[error("model invocation failed: {0}")]
    ModelInvocationFailed(String),
    /// No user identifier could be resolved from the request.
    #[error("no user identity in request")]
    MissingIdentity,
    /// The turn index kept moving under us.
    #[error("turn index for {user_id} changed concurrently {attempts} times")]
    TurnConflict { user_id: String, attempts: u32 },
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        ChatError::StorageUnavailable(err.to_string())
    }
}

impl ChatError {
    /// Whether the orchestrator turns this into the apology reply instead of
    /// failing the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::RetrievalFailed(_) | ChatError::ModelInvocationFailed(_)
        )
    }
}

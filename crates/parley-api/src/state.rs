//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use parley_chat::{DocumentSearch, LanguageModel, TurnOrchestrator};
use parley_core::config::ParleyConfig;
use parley_storage::{ConversationLogStore, SessionIndexStore};

/// Shared application state.
///
/// Every field is cheap to clone; handlers receive it through axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration. Read-only once the server starts.
    pub config: Arc<ParleyConfig>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub session_index: Arc<dyn SessionIndexStore>,
    pub conversation_log: Arc<dyn ConversationLogStore>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ParleyConfig,
        session_index: Arc<dyn SessionIndexStore>,
        conversation_log: Arc<dyn ConversationLogStore>,
        search: Arc<dyn DocumentSearch>,
        model: Arc<dyn LanguageModel>,
        api_token: impl Into<String>,
    ) -> Self {
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&session_index),
            Arc::clone(&conversation_log),
            search,
            model,
            &config,
        );
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            session_index,
            conversation_log,
            api_token: api_token.into(),
            start_time: Instant::now(),
        }
    }
}

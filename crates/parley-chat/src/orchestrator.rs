//! Turn orchestrator: central coordinator for one dialog event.
//!
//! Resolves identity, advances the user's turn, records both sides of the
//! exchange, and wires retrieval, prompt composition and model invocation
//! into a single reply envelope.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use parley_core::config::{ParleyConfig, RetrievalFailurePolicy};
use parley_core::types::{ConversationMessage, RetrievedPassage, Role};
use parley_storage::{ConversationLogStore, SessionIndexStore};

use crate::dialog::{DialogEvent, USER_NAME_SLOT};
use crate::dispatcher::{build_reply, ConversationState, DialogResponse, ReplyKind};
use crate::error::ChatError;
use crate::model::LanguageModel;
use crate::prompt::{PromptComposer, PromptInput};
use crate::retrieval::DocumentSearch;
use crate::session::{ConversationLog, SessionManager};

/// Answer used whenever retrieval or the model fails.
pub const APOLOGY: &str = "Sorry! It appears we have encountered an issue.";

pub const IDENTITY_PROMPT: &str = "Hi there! Before we start, what is your name?";
pub const GREETING: &str = "Hi! Ask me anything about Enviroflares.";
pub const REPHRASE_PROMPT: &str = "Sorry, I didn't catch that. Could you rephrase your question?";

/// Session attribute carrying the conversation log key of the last turn.
pub const CHAT_SESSION_ATTRIBUTE: &str = "ChatSessionId";

/// Handles one dialog event end to end.
pub struct TurnOrchestrator {
    sessions: SessionManager,
    log: ConversationLog,
    search: Arc<dyn DocumentSearch>,
    model: Arc<dyn LanguageModel>,
    composer: PromptComposer,
    on_retrieval_failure: RetrievalFailurePolicy,
}

impl TurnOrchestrator {
    pub fn new(
        index: Arc<dyn SessionIndexStore>,
        log: Arc<dyn ConversationLogStore>,
        search: Arc<dyn DocumentSearch>,
        model: Arc<dyn LanguageModel>,
        config: &ParleyConfig,
    ) -> Self {
        Self {
            sessions: SessionManager::new(index, config.session.max_advance_attempts),
            log: ConversationLog::new(log),
            search,
            model,
            composer: PromptComposer::new(&config.model),
            on_retrieval_failure: config.retrieval.on_failure,
        }
    }

    /// Process one event and build the reply.
    ///
    /// Retrieval and model failures become the apology answer. Storage
    /// failures abort the turn.
    ///
    /// Every utterance advances to a fresh session id, so the history handed
    /// to the prompt is only what the current turn's log holds when the
    /// question arrives, which is nothing. Earlier turns are not replayed.
    pub async fn handle(&self, event: &DialogEvent) -> Result<DialogResponse, ChatError> {
        let mut attributes = event.session_attributes();

        let user_id = match ConversationState::for_event(event) {
            ConversationState::Active(user_id) => user_id,
            ConversationState::AwaitingIdentity => {
                info!("No user identity, eliciting {}", USER_NAME_SLOT);
                return Ok(build_reply(ReplyKind::ElicitSlot {
                    slot: USER_NAME_SLOT.to_string(),
                    intent: event.session_state.intent.clone(),
                    message: IDENTITY_PROMPT.to_string(),
                    session_attributes: attributes,
                }));
            }
        };
        attributes.insert(USER_NAME_SLOT.to_string(), user_id.clone());

        if !event.is_dialog_code_hook() {
            return Ok(answer(GREETING.to_string(), attributes));
        }

        let question = event.input_transcript.trim();
        if question.is_empty() {
            return Ok(answer(REPHRASE_PROMPT.to_string(), attributes));
        }

        let session = self.sessions.resolve_and_advance(&user_id)?;
        let history = self.log.load_history(&session.session_id)?;
        self.log
            .append_message(&session.session_id, Role::User, question)?;

        let reply = self.generate(question, &history).await;

        self.log
            .append_message(&session.session_id, Role::Assistant, &reply)?;
        attributes.insert(
            CHAT_SESSION_ATTRIBUTE.to_string(),
            session.session_id.to_string(),
        );

        info!(
            user_id = %user_id,
            session_id = %session.session_id,
            "Turn completed"
        );
        Ok(answer(reply, attributes))
    }

    /// Retrieve, compose, invoke. Never fails: errors become [`APOLOGY`].
    async fn generate(&self, question: &str, history: &[ConversationMessage]) -> String {
        let passages = match self.retrieve(question).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, apologizing");
                return APOLOGY.to_string();
            }
        };

        let request = self
            .composer
            .compose(&PromptInput::new(question, &passages, history));

        match self.model.invoke(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Model invocation failed, apologizing");
                APOLOGY.to_string()
            }
        }
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedPassage>, ChatError> {
        match self.search.search(question).await {
            Ok(passages) => Ok(passages),
            Err(e @ ChatError::RetrievalFailed(_)) => match self.on_retrieval_failure {
                RetrievalFailurePolicy::Apologize => Err(e),
                RetrievalFailurePolicy::EmptyContext => {
                    warn!(error = %e, "Retrieval failed, continuing without context");
                    Ok(Vec::new())
                }
            },
            Err(e) => Err(e),
        }
    }
}

fn answer(message: String, session_attributes: HashMap<String, String>) -> DialogResponse {
    build_reply(ReplyKind::ElicitIntent {
        message,
        session_attributes,
    })
}

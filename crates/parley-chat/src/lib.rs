//! Conversational handler for Parley.
//!
//! Turns one dialog front-end event into a reply: resolves the user's turn,
//! records the exchange, retrieves supporting passages, composes the prompt
//! and invokes the hosted model.

pub mod dialog;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod session;

pub use dialog::{DialogEvent, Intent, SessionState, Slot, SlotValue};
pub use dispatcher::{
    build_reply, ConversationState, DialogActionType, DialogResponse, Message, ReplyKind,
};
pub use error::ChatError;
pub use model::{HttpModelClient, LanguageModel};
pub use orchestrator::{TurnOrchestrator, APOLOGY};
pub use prompt::{ModelRequest, PromptComposer, PromptInput, SYSTEM_INSTRUCTION};
pub use retrieval::{DocumentSearch, HttpSearchClient};
pub use session::{ConversationLog, ResolvedSession, SessionManager};

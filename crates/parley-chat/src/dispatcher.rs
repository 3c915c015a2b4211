//! Outbound dialog envelopes.
//!
//! Two reply shapes are produced: `ElicitIntent`, which carries an answer
//! and a card of suggested questions, and `ElicitSlot`, which asks the front
//! end to collect a missing slot before the conversation can start.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dialog::{DialogEvent, Intent};

/// Name of the active context attached to slot elicitation.
pub const INTENT_CONTEXT: &str = "intentContext";
pub const CONTEXT_TTL_SECONDS: u32 = 86_400;
pub const CONTEXT_TURNS_TO_LIVE: u32 = 20;

pub const SUGGESTION_CARD_TITLE: &str = "How can I help you?";

/// Suggested questions shown with every answer, as (label, utterance).
pub const SUGGESTIONS: [(&str, &str); 3] = [
    ("About Enviroflares", "What is Enviroflares?"),
    ("About this chatbot", "Who can I ask about this chatbot?"),
    ("Ask GenAI", "What kind of questions can you answer?"),
];

// =============================================================================
// Envelope types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogResponse {
    pub session_state: ResponseSessionState,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSessionState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_contexts: Vec<ActiveContext>,
    pub session_attributes: HashMap<String, String>,
    pub dialog_action: DialogAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveContext {
    pub name: String,
    pub context_attributes: HashMap<String, String>,
    pub time_to_live: TimeToLive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeToLive {
    pub time_to_live_in_seconds: u32,
    pub turns_to_live: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogAction {
    #[serde(rename = "type")]
    pub kind: DialogActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_to_elicit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogActionType {
    ElicitIntent,
    ElicitSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "contentType")]
pub enum Message {
    PlainText {
        content: String,
    },
    ImageResponseCard {
        #[serde(rename = "imageResponseCard")]
        card: ResponseCard,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCard {
    pub title: String,
    pub buttons: Vec<CardButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardButton {
    pub text: String,
    pub value: String,
}

impl DialogResponse {
    pub fn action(&self) -> DialogActionType {
        self.session_state.dialog_action.kind
    }

    /// First plain-text message.
    pub fn text(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| match m {
            Message::PlainText { content } => Some(content.as_str()),
            _ => None,
        })
    }
}

// =============================================================================
// Reply construction
// =============================================================================

/// What the orchestrator wants to say.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyKind {
    /// Answer and wait for the next utterance.
    ElicitIntent {
        message: String,
        session_attributes: HashMap<String, String>,
    },
    /// Ask the front end to fill `slot` on `intent`.
    ElicitSlot {
        slot: String,
        intent: Intent,
        message: String,
        session_attributes: HashMap<String, String>,
    },
}

/// Where a user's conversation stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationState {
    /// No identity yet; the only reply is a slot elicitation.
    AwaitingIdentity,
    /// Identity known; every utterance is answered on behalf of this user.
    Active(String),
}

impl ConversationState {
    pub fn for_event(event: &DialogEvent) -> Self {
        match event.user_id() {
            Some(user_id) => ConversationState::Active(user_id),
            None => ConversationState::AwaitingIdentity,
        }
    }
}

pub fn build_reply(kind: ReplyKind) -> DialogResponse {
    match kind {
        ReplyKind::ElicitIntent {
            message,
            session_attributes,
        } => DialogResponse {
            session_state: ResponseSessionState {
                active_contexts: Vec::new(),
                session_attributes,
                dialog_action: DialogAction {
                    kind: DialogActionType::ElicitIntent,
                    slot_to_elicit: None,
                },
                intent: None,
            },
            messages: vec![
                Message::PlainText { content: message },
                Message::ImageResponseCard {
                    card: suggestion_card(),
                },
            ],
        },
        ReplyKind::ElicitSlot {
            slot,
            intent,
            message,
            session_attributes,
        } => DialogResponse {
            session_state: ResponseSessionState {
                active_contexts: vec![ActiveContext {
                    name: INTENT_CONTEXT.to_string(),
                    context_attributes: session_attributes.clone(),
                    time_to_live: TimeToLive {
                        time_to_live_in_seconds: CONTEXT_TTL_SECONDS,
                        turns_to_live: CONTEXT_TURNS_TO_LIVE,
                    },
                }],
                session_attributes,
                dialog_action: DialogAction {
                    kind: DialogActionType::ElicitSlot,
                    slot_to_elicit: Some(slot),
                },
                intent: Some(intent),
            },
            messages: vec![Message::PlainText { content: message }],
        },
    }
}

fn suggestion_card() -> ResponseCard {
    ResponseCard {
        title: SUGGESTION_CARD_TITLE.to_string(),
        buttons: SUGGESTIONS
            .iter()
            .map(|(text, value)| CardButton {
                text: text.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

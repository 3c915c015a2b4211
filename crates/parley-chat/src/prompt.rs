//! Prompt composition.
//!
//! Builds the single-message model request from the fixed assistant
//! instruction, the prior conversation, the user's question and the
//! retrieved passages. Composition does no I/O and no truncation.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use parley_core::config::ModelConfig;
use parley_core::types::{ConversationMessage, RetrievedPassage, Role};

/// Standing instruction for the assistant persona.
pub const SYSTEM_INSTRUCTION: &str = "\
Act as an internal chatbot assistant for a company named Enviroflares.
Your role is to provide accurate and relevant information in response to specific questions from employees by checking your knowledge base from uploaded documents and using your general knowledge as a pre-trained Large Language Model.

Here are some important guidelines for the interaction:
- Whenever a user asks a question, first refer to the provided context from the uploaded documents.
- If the answer can be found in the uploaded documents, provide the information directly from there.
- If the information is not available in the context, use your general knowledge to answer the question.
- If the user's question is unclear or lacks sufficient information for a response, ask the user for more detail.
- Cite only the sources you actually used for your answer, not every available source.
- Respond quickly and in a friendly manner.
- Format your response for easy reading.

Using the following context, answer the question to the best of your ability. Leave out information that is not relevant to the question.";

/// Everything a prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub instruction: &'a str,
    pub question: &'a str,
    pub passages: &'a [RetrievedPassage],
    pub history: &'a [ConversationMessage],
}

impl<'a> PromptInput<'a> {
    /// Input using [`SYSTEM_INSTRUCTION`].
    pub fn new(
        question: &'a str,
        passages: &'a [RetrievedPassage],
        history: &'a [ConversationMessage],
    ) -> Self {
        Self {
            instruction: SYSTEM_INSTRUCTION,
            question,
            passages,
            history,
        }
    }
}

// =============================================================================
// Request envelope
// =============================================================================

/// Request body for the hosted model, plus the model it is addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Travels in the invocation URL, not the body.
    #[serde(skip)]
    pub model_id: String,
    pub anthropic_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub messages: Vec<ModelMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ModelRequest {
    /// Text of the first content block, if any.
    pub fn prompt_text(&self) -> Option<&str> {
        self.messages
            .first()
            .and_then(|m| m.content.first())
            .map(|block| block.text.as_str())
    }
}

// =============================================================================
// Composer
// =============================================================================

/// Turns [`PromptInput`] into a [`ModelRequest`] with fixed generation settings.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    model_id: String,
    anthropic_version: String,
    max_tokens: u32,
    temperature: f32,
}

impl PromptComposer {
    pub fn new(settings: &ModelConfig) -> Self {
        Self {
            model_id: settings.model_id.clone(),
            anthropic_version: settings.anthropic_version.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn compose(&self, input: &PromptInput<'_>) -> ModelRequest {
        ModelRequest {
            model_id: self.model_id.clone(),
            anthropic_version: self.anthropic_version.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![ModelMessage {
                role: "user".to_string(),
                content: vec![ContentBlock {
                    kind: "text".to_string(),
                    text: render_prompt(input),
                }],
            }],
        }
    }
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(&ModelConfig::default())
    }
}

/// Render the prompt text: instruction, history, question, then context.
pub fn render_prompt(input: &PromptInput<'_>) -> String {
    let mut out = String::new();
    out.push_str(input.instruction.trim());
    out.push_str("\n\n");

    if !input.history.is_empty() {
        out.push_str("Conversation so far:\n");
        for message in input.history {
            let speaker = match message.role {
                Role::User => "Human",
                Role::Assistant => "Assistant",
            };
            let _ = writeln!(out, "{}: {}", speaker, message.text.trim());
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Question: {}", input.question.trim());
    out.push('\n');

    if input.passages.is_empty() {
        out.push_str("Context: (no documents found)\n");
    } else {
        out.push_str("Context:\n");
        for (i, passage) in input.passages.iter().enumerate() {
            let _ = write!(out, "[{}]", i + 1);
            if let Some(title) = &passage.title {
                let _ = write!(out, " {}", title);
            }
            out.push('\n');
            let _ = writeln!(out, "{}", passage.excerpt.trim());
            if let Some(uri) = &passage.source_uri {
                let _ = writeln!(out, "Source: {}", uri);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_core::types::SessionId;
    use serde_json::json;
    use uuid::Uuid;

    fn passage(excerpt: &str, title: Option<&str>, uri: Option<&str>) -> RetrievedPassage {
        RetrievedPassage {
            excerpt: excerpt.to_string(),
            title: title.map(str::to_string),
            source_uri: uri.map(str::to_string),
        }
    }

    fn message(role: Role, text: &str) -> ConversationMessage {
        ConversationMessage {
            id: Uuid::new_v4(),
            session_id: SessionId::for_turn("alice", 1),
            role,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sections_appear_in_order() {
        let passages = vec![passage(
            "Flares burn waste gas.",
            Some("Flare Basics"),
            Some("https://docs/flares"),
        )];
        let history = vec![
            message(Role::User, "hi"),
            message(Role::Assistant, "hello, how can I help?"),
        ];
        let text = render_prompt(&PromptInput::new("What does a flare do?", &passages, &history));

        let instruction = text.find("Enviroflares").unwrap();
        let convo = text.find("Human: hi").unwrap();
        let question = text.find("Question: What does a flare do?").unwrap();
        let context = text.find("[1] Flare Basics").unwrap();
        assert!(instruction < convo);
        assert!(convo < question);
        assert!(question < context);
        assert!(text.contains("Assistant: hello, how can I help?"));
        assert!(text.contains("Source: https://docs/flares"));
    }

    #[test]
    fn test_passages_numbered_and_source_optional() {
        let passages = vec![
            passage("first", None, None),
            passage("second", Some("Doc B"), Some("https://b")),
        ];
        let text = render_prompt(&PromptInput::new("q", &passages, &[]));
        assert!(text.contains("[1]\nfirst\n"));
        assert!(text.contains("[2] Doc B\nsecond\nSource: https://b\n"));
        assert_eq!(text.matches("Source:").count(), 1);
        assert!(!text.contains("Conversation so far"));
    }

    #[test]
    fn test_empty_context_is_marked() {
        let text = render_prompt(&PromptInput::new("q", &[], &[]));
        assert!(text.contains("Context: (no documents found)"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let passages = vec![passage("x", None, None)];
        let input = PromptInput::new("q", &passages, &[]);
        let composer = PromptComposer::default();
        assert_eq!(composer.compose(&input), composer.compose(&input));
    }

    #[test]
    fn test_request_envelope_shape() {
        let composer = PromptComposer::default();
        let request = composer.compose(&PromptInput::new("What is Enviroflares?", &[], &[]));
        assert_eq!(request.model_id, "anthropic.claude-3-haiku-20240307-v1:0");

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["anthropic_version"], json!("bedrock-2023-05-31"));
        assert_eq!(body["max_tokens"], json!(3500));
        assert!((body["temperature"].as_f64().unwrap() - 0.4).abs() < 1e-6);
        assert_eq!(body["messages"][0]["role"], json!("user"));
        assert_eq!(body["messages"][0]["content"][0]["type"], json!("text"));
        assert!(body.get("model_id").is_none());
        assert_eq!(
            body["messages"][0]["content"][0]["text"].as_str(),
            request.prompt_text()
        );
    }

    #[test]
    fn test_custom_settings() {
        let settings = ModelConfig {
            model_id: "custom-model".to_string(),
            max_tokens: 100,
            ..ModelConfig::default()
        };
        let request = PromptComposer::new(&settings).compose(&PromptInput::new("q", &[], &[]));
        assert_eq!(request.model_id, "custom-model");
        assert_eq!(request.max_tokens, 100);
    }
}

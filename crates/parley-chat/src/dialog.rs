//! Inbound dialog front-end event model (Lex V2 code-hook shape).

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Slot carrying the user's identity.
pub const USER_NAME_SLOT: &str = "UserName";

/// Invocation source for which a turn is processed.
pub const DIALOG_CODE_HOOK: &str = "DialogCodeHook";

/// Event delivered by the dialog front end for one utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogEvent {
    #[serde(default)]
    pub session_state: SessionState,
    #[serde(default)]
    pub invocation_source: String,
    #[serde(default)]
    pub input_transcript: String,
}

/// Front-end session state echoed on every turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub session_attributes: Option<HashMap<String, String>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The intent the front end matched, with its slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    #[serde(default)]
    pub name: String,
    /// Unfilled slots arrive as explicit `null`, and so may the whole map.
    #[serde(default, deserialize_with = "null_as_default")]
    pub slots: HashMap<String, Option<Slot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(default)]
    pub value: SlotValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreted_value: Option<String>,
    #[serde(default)]
    pub resolved_values: Vec<String>,
}

impl Slot {
    /// The slot's usable value.
    ///
    /// The interpreted value wins when the front end resolved the slot;
    /// otherwise the raw text the user typed is used. Blank values count as
    /// unset.
    pub fn resolved(&self) -> Option<&str> {
        let v = &self.value;
        let picked = if !v.resolved_values.is_empty() {
            v.interpreted_value.as_deref()
        } else {
            v.original_value.as_deref()
        };
        picked.map(str::trim).filter(|s| !s.is_empty())
    }
}

impl DialogEvent {
    /// Resolved value of a named slot, if the slot is present and filled.
    pub fn slot(&self, name: &str) -> Option<&str> {
        self.session_state
            .intent
            .slots
            .get(name)
            .and_then(|slot| slot.as_ref())
            .and_then(Slot::resolved)
    }

    /// Session attributes, treating an absent map as empty.
    pub fn session_attributes(&self) -> HashMap<String, String> {
        self.session_state
            .session_attributes
            .clone()
            .unwrap_or_default()
    }

    /// The user's identity: the `UserName` slot, or the value echoed back in
    /// session attributes by a previous turn.
    pub fn user_id(&self) -> Option<String> {
        if let Some(name) = self.slot(USER_NAME_SLOT) {
            return Some(name.to_string());
        }
        self.session_state
            .session_attributes
            .as_ref()
            .and_then(|attrs| attrs.get(USER_NAME_SLOT))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn is_dialog_code_hook(&self) -> bool {
        self.invocation_source == DIALOG_CODE_HOOK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_from(value: serde_json::Value) -> DialogEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_full_event() {
        let event = event_from(json!({
            "sessionId": "abc",
            "invocationSource": "DialogCodeHook",
            "inputTranscript": "What is Enviroflares?",
            "sessionState": {
                "intent": {
                    "name": "FallbackIntent",
                    "state": "InProgress",
                    "slots": {
                        "UserName": {
                            "value": {
                                "originalValue": "alice",
                                "interpretedValue": "Alice",
                                "resolvedValues": ["Alice"]
                            }
                        }
                    }
                },
                "sessionAttributes": { "theme": "dark" }
            }
        }));

        assert!(event.is_dialog_code_hook());
        assert_eq!(event.input_transcript, "What is Enviroflares?");
        assert_eq!(event.session_state.intent.name, "FallbackIntent");
        assert_eq!(event.user_id().as_deref(), Some("Alice"));
        assert_eq!(event.session_attributes()["theme"], "dark");
    }

    #[test]
    fn test_unresolved_slot_falls_back_to_original_value() {
        let event = event_from(json!({
            "sessionState": { "intent": { "name": "x", "slots": {
                "UserName": { "value": {
                    "originalValue": "bob",
                    "interpretedValue": "Robert",
                    "resolvedValues": []
                } }
            } } }
        }));
        assert_eq!(event.user_id().as_deref(), Some("bob"));
    }

    #[test]
    fn test_null_slot_is_unset() {
        let event = event_from(json!({
            "invocationSource": "DialogCodeHook",
            "sessionState": { "intent": { "name": "x", "slots": { "UserName": null } } }
        }));
        assert!(event.slot(USER_NAME_SLOT).is_none());
        assert!(event.user_id().is_none());
    }

    #[test]
    fn test_null_slots_map_parses_like_absent_map() {
        let null_slots = event_from(json!({
            "invocationSource": "DialogCodeHook",
            "sessionState": {
                "intent": { "name": "FallbackIntent", "slots": null },
                "sessionAttributes": { "UserName": "erin" }
            }
        }));
        let absent_slots = event_from(json!({
            "invocationSource": "DialogCodeHook",
            "sessionState": {
                "intent": { "name": "FallbackIntent" },
                "sessionAttributes": { "UserName": "erin" }
            }
        }));

        assert!(null_slots.session_state.intent.slots.is_empty());
        assert_eq!(null_slots.session_state.intent, absent_slots.session_state.intent);
        assert_eq!(null_slots.user_id().as_deref(), Some("erin"));
    }

    #[test]
    fn test_blank_slot_is_unset() {
        let event = event_from(json!({
            "sessionState": { "intent": { "name": "x", "slots": {
                "UserName": { "value": { "originalValue": "   " } }
            } } }
        }));
        assert!(event.user_id().is_none());
    }

    #[test]
    fn test_identity_from_session_attributes() {
        let event = event_from(json!({
            "sessionState": {
                "intent": { "name": "x", "slots": {} },
                "sessionAttributes": { "UserName": "carol" }
            }
        }));
        assert_eq!(event.user_id().as_deref(), Some("carol"));
    }

    #[test]
    fn test_slot_wins_over_session_attribute() {
        let event = event_from(json!({
            "sessionState": {
                "intent": { "name": "x", "slots": {
                    "UserName": { "value": { "originalValue": "dave" } }
                } },
                "sessionAttributes": { "UserName": "carol" }
            }
        }));
        assert_eq!(event.user_id().as_deref(), Some("dave"));
    }

    #[test]
    fn test_missing_session_attributes_is_empty_map() {
        let event = event_from(json!({ "sessionState": { "sessionAttributes": null } }));
        assert!(event.session_attributes().is_empty());
        assert!(!event.is_dialog_code_hook());
    }
}

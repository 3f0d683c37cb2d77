//! Events emitted while an assistant turn is generated.
//!
//! These are the only shapes that cross the wire between the server and a
//! client. Every turn ends with exactly one terminal event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// Next slice of the assistant's reply
    TextDelta { value: String },

    #[serde(rename_all = "camelCase")]
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallResult { call_id: String, output: Value },

    #[serde(rename_all = "camelCase")]
    ToolCallError { call_id: String, message: String },

    TurnEnd,

    TurnError { message: String },
}

impl ChatEvent {
    /// Wire name, also used as the SSE `event:` field
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::TextDelta { .. } => "text-delta",
            ChatEvent::ToolCallStarted { .. } => "tool-call-started",
            ChatEvent::ToolCallResult { .. } => "tool-call-result",
            ChatEvent::ToolCallError { .. } => "tool-call-error",
            ChatEvent::TurnEnd => "turn-end",
            ChatEvent::TurnError { .. } => "turn-error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::TurnEnd | ChatEvent::TurnError { .. })
    }

    pub fn text(value: impl Into<String>) -> Self {
        ChatEvent::TextDelta {
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = ChatEvent::ToolCallStarted {
            call_id: "call_1".to_string(),
            name: "get_places".to_string(),
            arguments: json!({"query": "parks"}),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "tool-call-started",
                "callId": "call_1",
                "name": "get_places",
                "arguments": {"query": "parks"}
            })
        );
        assert_eq!(
            serde_json::to_value(ChatEvent::TurnEnd).unwrap(),
            json!({"type": "turn-end"})
        );
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let events = [
            ChatEvent::text("hi"),
            ChatEvent::ToolCallResult {
                call_id: "a".to_string(),
                output: json!(null),
            },
            ChatEvent::ToolCallError {
                call_id: "a".to_string(),
                message: "x".to_string(),
            },
            ChatEvent::TurnEnd,
            ChatEvent::TurnError {
                message: "x".to_string(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.kind());
        }
    }

    #[test]
    fn test_terminal() {
        assert!(ChatEvent::TurnEnd.is_terminal());
        assert!(!ChatEvent::text("x").is_terminal());
    }
}

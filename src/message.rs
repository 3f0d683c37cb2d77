//! Conversation data model and the message normalizer.
//!
//! Clients send turns in two shapes: a plain `content` string, or a `parts`
//! array whose entries are text or tool invocations (older clients also attach
//! a separate `toolInvocations` list). Everything is converted into the single
//! tagged [`Segment`] form here, so nothing downstream sees the raw shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Lenient parse used for client-supplied roles. Anything that is not
    /// clearly the assistant is treated as the user.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "assistant" | "model" => Role::Assistant,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Lifecycle of a tool call segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum ToolOutcome {
    Pending,
    Result(Value),
    Error(String),
}

impl ToolOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, ToolOutcome::Pending)
    }
}

/// Errors from mutating a segment
#[derive(Error, Debug, PartialEq)]
pub enum SegmentError {
    #[error("Tool call {0} is already resolved")]
    AlreadyResolved(String),

    #[error("Cannot resolve a tool call back to pending")]
    PendingTransition,
}

/// One unit of a turn's content, in rendering order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Segment {
    Text {
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        name: String,
        call_id: String,
        arguments: Value,
        outcome: ToolOutcome,
    },
}

impl Segment {
    pub fn text(value: impl Into<String>) -> Self {
        Segment::Text {
            value: value.into(),
        }
    }

    pub fn pending_call(name: impl Into<String>, call_id: impl Into<String>, arguments: Value) -> Self {
        Segment::ToolCall {
            name: name.into(),
            call_id: call_id.into(),
            arguments,
            outcome: ToolOutcome::Pending,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            Segment::ToolCall { call_id, .. } => Some(call_id),
            Segment::Text { .. } => None,
        }
    }

    /// Move a pending tool call to its final outcome. Allowed once.
    pub fn resolve(&mut self, result: ToolOutcome) -> Result<(), SegmentError> {
        match self {
            Segment::ToolCall {
                call_id, outcome, ..
            } => {
                if !outcome.is_pending() {
                    return Err(SegmentError::AlreadyResolved(call_id.clone()));
                }
                if result.is_pending() {
                    return Err(SegmentError::PendingTransition);
                }
                *outcome = result;
                Ok(())
            }
            Segment::Text { .. } => Ok(()),
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub segments: Vec<Segment>,
}

impl ConversationTurn {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            segments: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            segments: vec![Segment::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            segments: vec![Segment::text(text)],
        }
    }

    /// Concatenation of every text segment, in order
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { value } => Some(value.as_str()),
                Segment::ToolCall { .. } => None,
            })
            .collect()
    }

    pub fn find_call_mut(&mut self, id: &str) -> Option<&mut Segment> {
        self.segments
            .iter_mut()
            .find(|s| s.call_id() == Some(id))
    }

    /// Serialize in the `parts` shape the chat endpoint accepts
    pub fn to_raw(&self) -> Value {
        let parts: Vec<Value> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Text { value } => serde_json::json!({"type": "text", "text": value}),
                Segment::ToolCall {
                    name,
                    call_id,
                    arguments,
                    outcome,
                } => {
                    let mut part = serde_json::json!({
                        "type": format!("tool-{}", name),
                        "toolCallId": call_id,
                        "input": arguments,
                    });
                    match outcome {
                        ToolOutcome::Pending => part["state"] = "input-available".into(),
                        ToolOutcome::Result(output) => {
                            part["state"] = "output-available".into();
                            part["output"] = output.clone();
                        }
                        ToolOutcome::Error(message) => {
                            part["state"] = "output-error".into();
                            part["errorText"] = message.clone().into();
                        }
                    }
                    part
                }
            })
            .collect();
        serde_json::json!({ "role": self.role.as_str(), "parts": parts })
    }
}

/// `{role, content}` pair handed to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// Convert a client-supplied turn into canonical form.
///
/// Never fails: fields of the wrong type are ignored, and a value that is
/// not an object becomes an empty user turn.
pub fn canonicalize(raw: &Value) -> ConversationTurn {
    let role = raw
        .get("role")
        .and_then(Value::as_str)
        .map(Role::from_raw)
        .unwrap_or(Role::User);
    let mut turn = ConversationTurn::new(role);

    let parts = raw
        .get("parts")
        .and_then(Value::as_array)
        .filter(|parts| !parts.is_empty());

    if let Some(parts) = parts {
        // A plain `content` string is the text; parts still own the tool
        // calls over `toolInvocations`.
        let segments = parts.iter().filter_map(segment_from_part);
        match raw.get("content").and_then(Value::as_str) {
            Some(text) => {
                if !text.is_empty() {
                    turn.segments.push(Segment::text(text));
                }
                turn.segments
                    .extend(segments.filter(|s| matches!(s, Segment::ToolCall { .. })));
            }
            None => turn.segments.extend(segments),
        }
        return turn;
    }

    match raw.get("content") {
        Some(Value::String(text)) => turn.segments.push(Segment::text(text.clone())),
        Some(Value::Array(parts)) => {
            turn.segments
                .extend(parts.iter().filter_map(segment_from_part));
        }
        _ => {}
    }

    if let Some(invocations) = raw.get("toolInvocations").and_then(Value::as_array) {
        turn.segments
            .extend(invocations.iter().filter_map(segment_from_legacy_invocation));
    }

    turn
}

/// Canonicalize a whole history
pub fn canonicalize_all(raw: &[Value]) -> Vec<ConversationTurn> {
    raw.iter().map(canonicalize).collect()
}

/// Normalize raw turns into the `{role, content}` pairs the model consumes.
pub fn normalize(raw: &[Value]) -> Vec<PromptMessage> {
    raw.iter()
        .map(|value| {
            let turn = canonicalize(value);
            PromptMessage {
                role: turn.role,
                content: turn.text(),
            }
        })
        .collect()
}

fn segment_from_part(part: &Value) -> Option<Segment> {
    let kind = part.get("type").and_then(Value::as_str)?;

    if kind == "text" {
        let text = part.get("text").and_then(Value::as_str).unwrap_or("");
        return Some(Segment::text(text));
    }

    if kind == "tool-invocation" || kind.starts_with("tool-") || kind == "dynamic-tool" {
        // Some clients nest the call data, others put it on the part itself
        let call = part.get("toolInvocation").unwrap_or(part);
        let name = call
            .get("toolName")
            .and_then(Value::as_str)
            .or_else(|| kind.strip_prefix("tool-").filter(|n| *n != "invocation"))
            .unwrap_or("unknown")
            .to_string();
        return Some(tool_segment(call, name));
    }

    None
}

fn segment_from_legacy_invocation(invocation: &Value) -> Option<Segment> {
    let name = invocation.get("toolName").and_then(Value::as_str)?;
    Some(tool_segment(invocation, name.to_string()))
}

fn tool_segment(call: &Value, name: String) -> Segment {
    let call_id = call
        .get("toolCallId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments = call
        .get("input")
        .or_else(|| call.get("args"))
        .cloned()
        .unwrap_or(Value::Null);

    let outcome = if let Some(error) = call.get("errorText").and_then(Value::as_str) {
        ToolOutcome::Error(error.to_string())
    } else if let Some(output) = call
        .get("output")
        .or_else(|| call.get("result"))
        .filter(|v| !v.is_null())
    {
        ToolOutcome::Result(output.clone())
    } else {
        ToolOutcome::Pending
    };

    Segment::ToolCall {
        name,
        call_id,
        arguments,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_string() {
        let out = normalize(&[json!({"role": "user", "content": "Hello"})]);
        assert_eq!(
            out,
            vec![PromptMessage {
                role: Role::User,
                content: "Hello".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_content_and_parts_is_empty() {
        let out = normalize(&[
            json!({"role": "assistant"}),
            json!({"role": "user", "content": 42}),
            json!("not even an object"),
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::Assistant);
        assert!(out.iter().all(|m| m.content.is_empty()));
        assert_eq!(out[2].role, Role::User);
    }

    #[test]
    fn test_parts_concatenate_text_in_order() {
        let raw = json!({
            "role": "assistant",
            "parts": [
                {"type": "text", "text": "Here are "},
                {"type": "tool-get_places", "toolCallId": "c1", "input": {"query": "parks"}},
                {"type": "step-start"},
                {"type": "text", "text": "some parks."}
            ]
        });
        let out = normalize(&[raw]);
        assert_eq!(out[0].content, "Here are some parks.");
    }

    #[test]
    fn test_parts_become_tagged_segments() {
        let raw = json!({
            "role": "assistant",
            "parts": [
                {"type": "text", "text": "Looking..."},
                {
                    "type": "tool-get_places",
                    "toolCallId": "c1",
                    "state": "output-available",
                    "input": {"query": "parks"},
                    "output": {"found": true, "count": 0, "places": []}
                }
            ]
        });
        let turn = canonicalize(&raw);
        assert_eq!(turn.segments.len(), 2);
        match &turn.segments[1] {
            Segment::ToolCall {
                name,
                call_id,
                arguments,
                outcome,
            } => {
                assert_eq!(name, "get_places");
                assert_eq!(call_id, "c1");
                assert_eq!(arguments["query"], "parks");
                assert!(matches!(outcome, ToolOutcome::Result(_)));
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_tool_invocation_part() {
        let raw = json!({
            "role": "assistant",
            "parts": [{
                "type": "tool-invocation",
                "toolInvocation": {
                    "toolCallId": "c9",
                    "toolName": "get_places",
                    "args": {"query": "lakes"},
                    "errorText": "boom"
                }
            }]
        });
        let turn = canonicalize(&raw);
        assert_eq!(
            turn.segments[0],
            Segment::ToolCall {
                name: "get_places".to_string(),
                call_id: "c9".to_string(),
                arguments: json!({"query": "lakes"}),
                outcome: ToolOutcome::Error("boom".to_string()),
            }
        );
    }

    #[test]
    fn test_legacy_invocations_read_without_parts() {
        let raw = json!({
            "role": "assistant",
            "content": "Found these.",
            "toolInvocations": [
                {"toolCallId": "old", "toolName": "get_places", "args": {}, "result": {"found": false}}
            ]
        });
        let turn = canonicalize(&raw);
        assert_eq!(turn.text(), "Found these.");
        assert_eq!(turn.segments.len(), 2);
        assert_eq!(turn.segments[1].call_id(), Some("old"));
    }

    #[test]
    fn test_parts_own_tool_calls_content_owns_text() {
        let raw = json!({
            "role": "assistant",
            "content": "Here are some parks.",
            "parts": [
                {"type": "text", "text": "older draft"},
                {"type": "tool-get_places", "toolCallId": "new", "output": {"found": true}}
            ],
            "toolInvocations": [
                {"toolCallId": "old", "toolName": "get_places", "result": {"found": false}}
            ]
        });
        let turn = canonicalize(&raw);
        assert_eq!(turn.segments.len(), 2);
        assert_eq!(turn.text(), "Here are some parks.");
        assert_eq!(turn.segments[1].call_id(), Some("new"));
    }

    #[test]
    fn test_content_string_wins_over_textless_parts() {
        let raw = json!({
            "role": "user",
            "content": "Hello",
            "parts": [{"type": "step-start"}]
        });
        assert_eq!(
            normalize(&[raw]),
            vec![PromptMessage {
                role: Role::User,
                content: "Hello".to_string(),
            }]
        );
    }

    #[test]
    fn test_parts_text_used_without_content_string() {
        let raw = json!({
            "role": "user",
            "content": 42,
            "parts": [{"type": "text", "text": "Lakes "}, {"type": "text", "text": "nearby?"}]
        });
        assert_eq!(canonicalize(&raw).text(), "Lakes nearby?");
    }

    #[test]
    fn test_resolve_exactly_once() {
        let mut segment = Segment::pending_call("get_places", "x", json!({}));
        segment
            .resolve(ToolOutcome::Result(json!({"found": true})))
            .unwrap();
        assert_eq!(
            segment.resolve(ToolOutcome::Error("late".to_string())),
            Err(SegmentError::AlreadyResolved("x".to_string()))
        );
    }

    #[test]
    fn test_resolve_cannot_go_back_to_pending() {
        let mut segment = Segment::pending_call("get_places", "x", json!({}));
        assert_eq!(
            segment.resolve(ToolOutcome::Pending),
            Err(SegmentError::PendingTransition)
        );
    }

    #[test]
    fn test_role_from_raw() {
        assert_eq!(Role::from_raw("assistant"), Role::Assistant);
        assert_eq!(Role::from_raw("model"), Role::Assistant);
        assert_eq!(Role::from_raw("system"), Role::User);
    }

    #[test]
    fn test_to_raw_canonicalizes_back() {
        let mut turn = ConversationTurn::assistant("Hi ");
        turn.segments
            .push(Segment::pending_call("get_places", "c1", json!({"query": "x"})));
        turn.segments[1]
            .resolve(ToolOutcome::Result(json!({"found": false})))
            .unwrap();
        turn.segments.push(Segment::text("there"));

        let back = canonicalize(&turn.to_raw());
        assert_eq!(back, turn);
    }
}

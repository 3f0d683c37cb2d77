//! Model backends - translate a turn into a hosted model's streaming API.
//!
//! The engine talks to a [`ModelBackend`]; the production implementation is
//! [`GeminiBackend`], which calls `streamGenerateContent` with SSE output and
//! turns each streamed candidate into [`ModelChunk`]s.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::relay::SseDecoder;
use crate::tools::{ToolCall, ToolDefinition};

/// Used when the caller does not pick a model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Logical model name -> backend model name
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gemini-2.5-flash", "gemini-2.5-flash"),
    ("gemini-2.5-flash-lite", "gemini-2.5-flash-lite"),
    ("gemini-3-pro-preview", "gemini-3-pro-preview"),
    ("gemini-2.0-flash", "gemini-2.0-flash"),
    ("gemini-2.0-flash-lite", "gemini-2.0-flash-lite"),
    ("gemini-1.5-pro", "gemini-1.5-pro-latest"),
    ("gemini-1.5-flash", "gemini-1.5-flash-latest"),
];

/// A model the client can offer in its picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelOption {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// The closed set of selectable models, default first
pub const MODEL_CATALOG: &[ModelOption] = &[
    ModelOption {
        id: "gemini-2.5-flash",
        name: "Lumina 2.0",
        description: "Default • Balanced",
    },
    ModelOption {
        id: "gemini-2.5-flash-lite",
        name: "Lumina 2.0 Lite",
        description: "Fast • Efficient",
    },
    ModelOption {
        id: "gemini-3-pro-preview",
        name: "Lumina Pro",
        description: "Most Capable • Preview",
    },
    ModelOption {
        id: "gemini-2.0-flash",
        name: "Lumina 1.0",
        description: "Standard",
    },
    ModelOption {
        id: "gemini-2.0-flash-lite",
        name: "Lumina 1.0 Lite",
        description: "Lightweight",
    },
];

pub fn find_model(id: &str) -> Option<&'static ModelOption> {
    MODEL_CATALOG.iter().find(|m| m.id == id)
}

/// Map the caller's model choice to the backend model name.
///
/// Known names go through the alias table, unknown names pass through
/// unchanged, and no name (or a blank one) selects [`DEFAULT_MODEL`].
pub fn resolve_model(requested: Option<&str>) -> String {
    let requested = match requested.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return DEFAULT_MODEL.to_string(),
    };
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == requested)
        .map(|(_, target)| (*target).to_string())
        .unwrap_or_else(|| requested.to_string())
}

/// Errors that can occur during provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Conversation entry in the form the engine feeds back to the model
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    User {
        text: String,
    },
    Assistant {
        text: String,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call: ToolCall,
        output: Value,
    },
}

/// Everything a backend needs for one generation step
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Streamed output of one generation step
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    Text(String),
    ToolCall {
        name: String,
        arguments: Value,
        signature: Option<String>,
    },
}

pub type ChunkStream = BoxStream<'static, Result<ModelChunk, ProviderError>>;

/// Trait for model backends
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Start one generation step. The stream ends when the model has
    /// nothing more to say for this step.
    async fn stream(&self, request: &ModelRequest) -> Result<ChunkStream, ProviderError>;
}

/// Google Gemini API backend
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    /// Convert a request to Gemini's `generateContent` body
    pub fn transform_request(request: &ModelRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();

        for message in &request.messages {
            match message {
                ModelMessage::User { text } => {
                    // Empty parts are rejected upstream; malformed client
                    // turns normalize to empty text.
                    if !text.is_empty() {
                        contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                    }
                }
                ModelMessage::Assistant { text, calls } => {
                    let mut parts = Vec::new();
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                    for call in calls {
                        let mut part = json!({
                            "functionCall": {"name": call.name, "args": call.arguments}
                        });
                        if let Some(signature) = &call.signature {
                            part["thoughtSignature"] = json!(signature);
                        }
                        parts.push(part);
                    }
                    if !parts.is_empty() {
                        contents.push(json!({"role": "model", "parts": parts}));
                    }
                }
                ModelMessage::ToolResult { call, output } => {
                    let response = if output.is_object() {
                        output.clone()
                    } else {
                        json!({"result": output})
                    };
                    let part = json!({
                        "functionResponse": {"name": call.name, "response": response}
                    });
                    // Results of one round share a single content entry
                    let grouped = contents.last_mut().filter(|c| {
                        c["role"] == "user"
                            && c["parts"]
                                .as_array()
                                .is_some_and(|p| p.iter().all(|p| p.get("functionResponse").is_some()))
                    });
                    match grouped.and_then(|c| c["parts"].as_array_mut()) {
                        Some(parts) => parts.push(part),
                        None => contents.push(json!({"role": "user", "parts": [part]})),
                    }
                }
            }
        }

        let mut body = json!({ "contents": contents });

        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": request.system_prompt}]});
        }

        if !request.tools.is_empty() {
            let functions: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": functions }]);
        }

        body
    }

    /// Parse one streamed `GenerateContentResponse`
    pub fn parse_chunk(data: &str) -> Vec<Result<ModelChunk, ProviderError>> {
        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(ProviderError::InvalidResponse(format!(
                    "undecodable stream chunk: {}",
                    e
                )))]
            }
        };

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return vec![Err(ProviderError::Upstream(message))];
        }

        let parts = value
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array);

        let Some(parts) = parts else {
            return Vec::new();
        };

        parts
            .iter()
            .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|p| {
                if let Some(call) = p.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str)?.to_string();
                    let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    let signature = p
                        .get("thoughtSignature")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Some(Ok(ModelChunk::ToolCall {
                        name,
                        arguments,
                        signature,
                    }));
                }
                p.get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(|t| Ok(ModelChunk::Text(t.to_string())))
            })
            .collect()
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "google"
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ChunkStream, ProviderError> {
        let url = self.endpoint(&request.model);
        let body = Self::transform_request(request);
        debug!(url = %url, messages = request.messages.len(), "Forwarding to Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        // The last frame may arrive without its blank-line terminator, so the
        // decoder is flushed once the body ends.
        let bytes = response.bytes_stream().boxed();
        let chunks = stream::unfold(Some((bytes, SseDecoder::new())), |state| async move {
            let (mut bytes, mut decoder) = state?;
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let parsed = decoder
                        .push(&chunk)
                        .iter()
                        .flat_map(|frame| Self::parse_chunk(&frame.data))
                        .collect::<Vec<_>>();
                    Some((parsed, Some((bytes, decoder))))
                }
                Some(Err(e)) => Some((
                    vec![Err(ProviderError::RequestFailed(e))],
                    Some((bytes, decoder)),
                )),
                None => {
                    let parsed = decoder
                        .finish()
                        .map(|frame| Self::parse_chunk(&frame.data))
                        .unwrap_or_default();
                    Some((parsed, None))
                }
            }
        })
        .flat_map(stream::iter);

        Ok(Box::pin(chunks))
    }
}

//! Model Invocation Engine - drives one assistant turn.
//!
//! A turn is a loop of generation steps. Each step streams text from the
//! model; if the step ends with tool calls, each call is announced, executed
//! and its result fed back before the next step. The loop stops when a step
//! requests no tools, or after `max_tool_rounds` rounds of tool calls.
//!
//! Events go out over a bounded channel. The engine runs in its own task and
//! stops as soon as the receiving side is dropped (client disconnect).

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::ChatEvent;
use crate::message::{PromptMessage, Role};
use crate::providers::{ModelBackend, ModelChunk, ModelMessage, ModelRequest, ProviderError};
use crate::tools::{ToolCall, ToolRegistry};

/// Shown to the user when the model backend fails mid-turn
pub const TURN_FAILED_MESSAGE: &str =
    "Sorry, I ran into a problem while answering. Please try again in a moment.";

/// Shown to the user when the turn exceeds its time budget
pub const TURN_TIMEOUT_MESSAGE: &str =
    "Sorry, that took longer than expected. Please try asking again.";

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 5;

pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 64;

/// Why a turn stopped before finishing normally
#[derive(Error, Debug)]
enum TurnFailure {
    #[error("model backend failed: {0}")]
    Backend(#[from] ProviderError),

    #[error("client disconnected")]
    Disconnected,
}

/// Input for one turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Full normalized history, oldest first
    pub history: Vec<PromptMessage>,
    /// Backend model name (already resolved)
    pub model: String,
    pub system_prompt: String,
}

struct Emitter {
    tx: mpsc::Sender<ChatEvent>,
}

impl Emitter {
    async fn emit(&self, event: ChatEvent) -> Result<(), TurnFailure> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TurnFailure::Disconnected)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Clone)]
pub struct ChatEngine {
    backend: Arc<dyn ModelBackend>,
    tools: ToolRegistry,
    max_tool_rounds: u32,
    turn_timeout: Duration,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn ModelBackend>, tools: ToolRegistry) -> Self {
        Self {
            backend,
            tools,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    pub fn with_limits(mut self, max_tool_rounds: u32, turn_timeout: Duration) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self.turn_timeout = turn_timeout;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start a turn. Events arrive on the returned stream, ending with
    /// exactly one `TurnEnd` or `TurnError` unless the stream is dropped.
    pub fn run(&self, request: TurnRequest) -> ReceiverStream<ChatEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let engine = self.clone();
        tokio::spawn(async move { engine.drive(request, Emitter { tx }).await });
        ReceiverStream::new(rx)
    }

    async fn drive(self, request: TurnRequest, emitter: Emitter) {
        info!(
            model = %request.model,
            history = request.history.len(),
            backend = self.backend.name(),
            "Starting turn"
        );

        let outcome = tokio::time::timeout(self.turn_timeout, self.generate(&request, &emitter)).await;

        let terminal = match outcome {
            Ok(Ok(())) => ChatEvent::TurnEnd,
            Ok(Err(TurnFailure::Disconnected)) => {
                debug!("Client went away, abandoning turn");
                return;
            }
            Ok(Err(TurnFailure::Backend(e))) => {
                warn!(error = %e, model = %request.model, "Turn failed");
                ChatEvent::TurnError {
                    message: TURN_FAILED_MESSAGE.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.turn_timeout.as_secs_f64(),
                    "Turn exceeded its time budget"
                );
                ChatEvent::TurnError {
                    message: TURN_TIMEOUT_MESSAGE.to_string(),
                }
            }
        };

        if emitter.emit(terminal).await.is_err() {
            debug!("Client went away before the turn finished");
        }
    }

    async fn generate(&self, request: &TurnRequest, emitter: &Emitter) -> Result<(), TurnFailure> {
        let mut messages: Vec<ModelMessage> = request
            .history
            .iter()
            .map(|m| match m.role {
                Role::User => ModelMessage::User {
                    text: m.content.clone(),
                },
                Role::Assistant => ModelMessage::Assistant {
                    text: m.content.clone(),
                    calls: Vec::new(),
                },
            })
            .collect();
        let tools = self.tools.definitions();

        for round in 1..=self.max_tool_rounds {
            if emitter.is_closed() {
                return Err(TurnFailure::Disconnected);
            }

            let step = ModelRequest {
                model: request.model.clone(),
                system_prompt: request.system_prompt.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };
            let mut chunks = self.backend.stream(&step).await?;

            let mut text = String::new();
            let mut calls = Vec::new();
            while let Some(chunk) = chunks.next().await {
                match chunk? {
                    ModelChunk::Text(delta) => {
                        text.push_str(&delta);
                        emitter.emit(ChatEvent::TextDelta { value: delta }).await?;
                    }
                    ModelChunk::ToolCall {
                        name,
                        arguments,
                        signature,
                    } => calls.push(ToolCall {
                        id: format!("call_{}", Uuid::new_v4().simple()),
                        name,
                        arguments,
                        signature,
                    }),
                }
            }

            if calls.is_empty() {
                debug!(round, "Model finished without tool calls");
                return Ok(());
            }

            messages.push(ModelMessage::Assistant {
                text,
                calls: calls.clone(),
            });

            for call in calls {
                self.run_tool(call, &mut messages, emitter).await?;
            }

            if round == self.max_tool_rounds {
                warn!(
                    rounds = self.max_tool_rounds,
                    "Tool round limit reached, ending turn"
                );
            }
        }

        Ok(())
    }

    async fn run_tool(
        &self,
        call: ToolCall,
        messages: &mut Vec<ModelMessage>,
        emitter: &Emitter,
    ) -> Result<(), TurnFailure> {
        emitter
            .emit(ChatEvent::ToolCallStarted {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;

        let output = match self.tools.execute(&call).await {
            Ok(output) => {
                emitter
                    .emit(ChatEvent::ToolCallResult {
                        call_id: call.id.clone(),
                        output: output.clone(),
                    })
                    .await?;
                output
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                emitter
                    .emit(ChatEvent::ToolCallError {
                        call_id: call.id.clone(),
                        message: e.to_string(),
                    })
                    .await?;
                json!({ "error": e.to_string() })
            }
        };

        messages.push(ModelMessage::ToolResult { call, output });
        Ok(())
    }
}

//! Client Turn Renderer - rebuilds the assistant turn from streamed events.
//!
//! [`TurnRenderer`] folds [`ChatEvent`]s into a [`ConversationTurn`].
//! [`ChatSession`] owns the conversation around it and keeps the bounded
//! [`ChatHistoryCache`] of recent conversations up to date.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::ChatEvent;
use crate::message::{ConversationTurn, Role, Segment, SegmentError, ToolOutcome};
use crate::places::{PlaceResult, PlacesResponse};
use crate::prompt::ToolHint;
use crate::tools::GET_PLACES;

/// Most recent conversations kept in the cache
pub const HISTORY_CAPACITY: usize = 10;

pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Appended when a turn fails without a message of its own
pub const APOLOGY_TEXT: &str = "Sorry, something went wrong. Please try again.";

const TITLE_CHARS: usize = 35;

/// Name given to a tool call we only learn about from its result
const UNKNOWN_TOOL: &str = "unknown";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to access history file: {0}")]
    Io(#[from] std::io::Error),

    #[error("History file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Where an in-progress turn stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Streaming,
    Complete,
    Failed,
}

impl TurnStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TurnStatus::Streaming)
    }
}

/// Builds one assistant turn from its events
#[derive(Debug, Clone)]
pub struct TurnRenderer {
    turn: ConversationTurn,
    status: TurnStatus,
}

impl Default for TurnRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnRenderer {
    pub fn new() -> Self {
        Self {
            turn: ConversationTurn::new(Role::Assistant),
            status: TurnStatus::Streaming,
        }
    }

    pub fn turn(&self) -> &ConversationTurn {
        &self.turn
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn into_turn(self) -> ConversationTurn {
        self.turn
    }

    /// Fold one event into the turn. Events after a terminal one are ignored.
    pub fn apply(&mut self, event: &ChatEvent) -> TurnStatus {
        if self.status.is_finished() {
            debug!(kind = event.kind(), "Ignoring event after turn finished");
            return self.status;
        }

        match event {
            ChatEvent::TextDelta { value } => self.append_text(value),
            ChatEvent::ToolCallStarted {
                call_id,
                name,
                arguments,
            } => {
                if self.turn.find_call_mut(call_id).is_some() {
                    debug!(call_id = %call_id, "Duplicate tool-call-started");
                } else {
                    self.turn
                        .segments
                        .push(Segment::pending_call(name, call_id, arguments.clone()));
                }
            }
            ChatEvent::ToolCallResult { call_id, output } => {
                self.resolve(call_id, ToolOutcome::Result(output.clone()))
            }
            ChatEvent::ToolCallError { call_id, message } => {
                self.resolve(call_id, ToolOutcome::Error(message.clone()))
            }
            ChatEvent::TurnEnd => self.status = TurnStatus::Complete,
            ChatEvent::TurnError { message } => {
                let apology = if message.trim().is_empty() {
                    APOLOGY_TEXT
                } else {
                    message.as_str()
                };
                let text = if self.turn.text().is_empty() {
                    apology.to_string()
                } else {
                    format!("\n\n{}", apology)
                };
                self.turn.segments.push(Segment::text(text));
                self.status = TurnStatus::Failed;
            }
        }

        self.status
    }

    fn append_text(&mut self, delta: &str) {
        if let Some(Segment::Text { value }) = self.turn.segments.last_mut() {
            value.push_str(delta);
        } else {
            self.turn.segments.push(Segment::text(delta));
        }
    }

    fn resolve(&mut self, call_id: &str, outcome: ToolOutcome) {
        if self.turn.find_call_mut(call_id).is_none() {
            debug!(call_id = %call_id, "Result for unseen tool call, synthesizing segment");
            // Venue results still render as cards when their start was missed
            let name = match &outcome {
                ToolOutcome::Result(output) if is_places_output(output) => GET_PLACES,
                _ => UNKNOWN_TOOL,
            };
            self.turn
                .segments
                .push(Segment::pending_call(name, call_id, Value::Null));
        }
        if let Some(segment) = self.turn.find_call_mut(call_id) {
            if let Err(SegmentError::AlreadyResolved(id)) = segment.resolve(outcome) {
                debug!(call_id = %id, "Ignoring second resolution");
            }
        }
    }
}

/// A conversation saved in the local cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryEntry {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<ConversationTurn>,
}

/// Title from the first user turn: 35 characters, "..." when cut
pub fn title_for(turns: &[ConversationTurn]) -> String {
    let text = turns
        .iter()
        .find(|t| t.role == Role::User)
        .map(ConversationTurn::text)
        .unwrap_or_default();
    let text = text.trim();

    if text.is_empty() {
        return NEW_CHAT_TITLE.to_string();
    }
    if text.chars().count() > TITLE_CHARS {
        let cut: String = text.chars().take(TITLE_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Recent conversations, most recent first, keyed by conversation id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistoryCache {
    entries: Vec<ChatHistoryEntry>,
}

impl ChatHistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `~/.lumina/chat_history.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".lumina").join("chat_history.json"))
    }

    /// Load from disk. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        let mut cache: Self = serde_json::from_str(&json)?;
        cache.entries.truncate(HISTORY_CAPACITY);
        Ok(cache)
    }

    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Insert or replace by id and move the entry to the front
    pub fn upsert(&mut self, entry: ChatHistoryEntry) {
        self.entries.retain(|e| e.id != entry.id);
        self.entries.insert(0, entry);
        if self.entries.len() > HISTORY_CAPACITY {
            let evicted = self.entries.split_off(HISTORY_CAPACITY);
            debug!(count = evicted.len(), "Evicted old conversations");
        }
    }

    pub fn get(&self, id: &str) -> Option<&ChatHistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[ChatHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Client-side state of one conversation
#[derive(Debug, Default)]
pub struct ChatSession {
    conversation_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    history: Vec<ConversationTurn>,
    pending: Option<TurnRenderer>,
    cache: ChatHistoryCache,
    pub model: Option<String>,
    pub tool_hint: ToolHint,
}

impl ChatSession {
    pub fn new(cache: ChatHistoryCache) -> Self {
        Self {
            cache,
            ..Self::default()
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn cache(&self) -> &ChatHistoryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ChatHistoryCache {
        &mut self.cache
    }

    /// The assistant turn currently streaming, if any
    pub fn in_progress(&self) -> Option<&ConversationTurn> {
        self.pending.as_ref().map(TurnRenderer::turn)
    }

    /// Record the user's message and build the chat request body
    pub fn begin_turn(&mut self, text: &str) -> Value {
        if self.conversation_id.is_none() {
            self.conversation_id = Some(Uuid::new_v4().to_string());
            self.created_at = Some(Utc::now());
        }
        self.history.push(ConversationTurn::user(text));
        self.pending = Some(TurnRenderer::new());
        self.request_body()
    }

    fn request_body(&self) -> Value {
        let messages: Vec<Value> = self.history.iter().map(ConversationTurn::to_raw).collect();
        let mut body = json!({ "messages": messages, "toolHint": self.tool_hint });
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        body
    }

    /// Feed an event to the in-progress turn. Returns the turn's status, or
    /// `None` when no turn is in progress.
    pub fn apply(&mut self, event: &ChatEvent) -> Option<TurnStatus> {
        let renderer = self.pending.as_mut()?;
        let status = renderer.apply(event);
        if status.is_finished() {
            self.finish_turn();
        }
        Some(status)
    }

    /// Close a turn whose stream ended without a terminal event
    pub fn abort_turn(&mut self) {
        if self.pending.is_some() {
            self.apply(&ChatEvent::TurnError {
                message: APOLOGY_TEXT.to_string(),
            });
        }
    }

    fn finish_turn(&mut self) {
        let Some(renderer) = self.pending.take() else {
            return;
        };
        let status = renderer.status();
        self.history.push(renderer.into_turn());

        if status != TurnStatus::Complete {
            warn!("Turn failed, leaving history cache untouched");
            return;
        }
        if let Some(id) = &self.conversation_id {
            self.cache.upsert(ChatHistoryEntry {
                id: id.clone(),
                title: title_for(&self.history),
                created_at: self.created_at.unwrap_or_else(Utc::now),
                turns: self.history.clone(),
            });
        }
    }

    /// Start over with an empty conversation
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.created_at = None;
        self.history.clear();
        self.pending = None;
    }

    /// Continue a cached conversation
    pub fn resume(&mut self, id: &str) -> bool {
        let Some(entry) = self.cache.get(id).cloned() else {
            return false;
        };
        self.conversation_id = Some(entry.id);
        self.created_at = Some(entry.created_at);
        self.history = entry.turns;
        self.pending = None;
        true
    }
}

/// A venue rendered for display
#[derive(Debug, Clone, PartialEq)]
pub struct LocationCard {
    pub name: String,
    pub address: String,
    pub rating: Option<f64>,
    pub rating_count: Option<u64>,
    pub maps_url: String,
    pub directions_url: String,
}

impl LocationCard {
    pub fn from_place(place: &PlaceResult) -> Self {
        let target = urlencoding::encode(&format!("{}, {}", place.name, place.address)).into_owned();
        Self {
            name: place.name.clone(),
            address: place.address.clone(),
            rating: place.rating,
            rating_count: place.rating_count,
            maps_url: format!("https://www.google.com/maps/search/?api=1&query={}", target),
            directions_url: format!(
                "https://www.google.com/maps/dir/?api=1&origin=current+location&destination={}&travelmode=driving",
                target
            ),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("* {}", self.name);
        if let Some(rating) = self.rating {
            out.push_str(&format!(" ({:.1}", rating));
            if let Some(count) = self.rating_count {
                out.push_str(&format!(", {} reviews", count));
            }
            out.push(')');
        }
        if !self.address.is_empty() {
            out.push_str(&format!("\n  {}", self.address));
        }
        out.push_str(&format!("\n  Open in Maps: {}", self.maps_url));
        out.push_str(&format!("\n  Directions: {}", self.directions_url));
        out
    }
}

/// Whether a tool output has the `get_places` payload shape
fn is_places_output(output: &Value) -> bool {
    output.get("found").is_some_and(Value::is_boolean)
        && output.get("places").is_some_and(Value::is_array)
}

/// Cards for a `get_places` output, or `None` when nothing was found
pub fn location_cards(output: &Value) -> Option<Vec<LocationCard>> {
    let response: PlacesResponse = serde_json::from_value(output.clone()).ok()?;
    if !response.found || response.places.is_empty() {
        return None;
    }
    Some(response.places.iter().map(LocationCard::from_place).collect())
}

/// Plain-text rendering of one segment
pub fn render_segment(segment: &Segment) -> String {
    match segment {
        Segment::Text { value } => value.clone(),
        Segment::ToolCall { name, outcome, .. } if name == GET_PLACES => match outcome {
            ToolOutcome::Pending => "Finding locations...".to_string(),
            ToolOutcome::Error(_) => "Failed to search places.".to_string(),
            ToolOutcome::Result(output) => match location_cards(output) {
                Some(cards) => cards
                    .iter()
                    .map(LocationCard::render)
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => "No locations found.".to_string(),
            },
        },
        Segment::ToolCall { name, outcome, .. } => match outcome {
            ToolOutcome::Pending => format!("Running {}...", name),
            ToolOutcome::Result(_) => format!("[{} finished]", name),
            ToolOutcome::Error(message) => format!("[{} failed: {}]", name, message),
        },
    }
}

/// Plain-text rendering of a whole turn
pub fn render_turn(turn: &ConversationTurn) -> String {
    let mut out = String::new();
    for segment in &turn.segments {
        let rendered = render_segment(segment);
        if matches!(segment, Segment::ToolCall { .. }) {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&rendered);
            out.push('\n');
        } else {
            out.push_str(&rendered);
        }
    }
    out
}

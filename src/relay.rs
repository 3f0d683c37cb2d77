//! Stream Relay - forwards engine events to the client as server-sent events.
//!
//! Each [`ChatEvent`] becomes one SSE frame (`event: <kind>`,
//! `data: <json>`), flushed as soon as it is produced. The relay forwards at
//! most one terminal event and nothing after it; if the engine stream ends
//! without one, a `turn-error` is synthesised so the client always sees the
//! turn finish.
//!
//! [`SseDecoder`] is the inverse and is shared by the Gemini backend (which
//! streams SSE upstream) and the chat client.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

use crate::events::ChatEvent;

/// Message used when a stream closes before reporting how the turn ended
pub const INTERRUPTED_MESSAGE: &str = "The response was interrupted. Please try again.";

/// Wrap the engine's events so that exactly one terminal event is emitted
/// and the stream ends right after it.
pub fn terminated<S>(events: S) -> impl Stream<Item = ChatEvent> + Send
where
    S: Stream<Item = ChatEvent> + Send + Unpin,
{
    stream::unfold((events, false), |(mut events, finished)| async move {
        if finished {
            return None;
        }
        match events.next().await {
            Some(event) => {
                let terminal = event.is_terminal();
                Some((event, (events, terminal)))
            }
            None => {
                warn!("Engine stream closed without a terminal event");
                let event = ChatEvent::TurnError {
                    message: INTERRUPTED_MESSAGE.to_string(),
                };
                Some((event, (events, true)))
            }
        }
    })
}

/// Encode one event as an SSE frame
pub fn to_sse_event(event: &ChatEvent) -> Event {
    match Event::default().event(event.kind()).json_data(event) {
        Ok(frame) => frame,
        Err(e) => {
            // Serializing our own enum cannot realistically fail; keep the
            // stream well-formed regardless.
            warn!(error = %e, "Failed to encode chat event");
            Event::default().event("turn-error").data(format!(
                "{{\"type\":\"turn-error\",\"message\":\"{}\"}}",
                INTERRUPTED_MESSAGE
            ))
        }
    }
}

/// Build the streaming HTTP response for one turn
pub fn relay<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ChatEvent> + Send + Unpin + 'static,
{
    let frames = terminated(events).map(|event| {
        debug!(kind = event.kind(), "Relaying event");
        Ok(to_sse_event(&event))
    });
    Sse::new(frames).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// One decoded SSE frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser. Feed it raw bytes as they arrive; complete frames
/// come back out. Bytes are buffered until a full line is available, so
/// multi-byte characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                // comment / keep-alive
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        frames
    }

    /// Flush a trailing frame that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            // last line arrived without a newline
            if let Some(frame) = self.push(b"\n").pop() {
                return Some(frame);
            }
        }
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Decode a relay frame back into an event
pub fn decode_event(frame: &SseFrame) -> Option<ChatEvent> {
    serde_json::from_str(&frame.data).ok()
}

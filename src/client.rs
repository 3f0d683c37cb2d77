//! HTTP client for a running Lumina server.
//!
//! Sends the session's history to `/api/chat` and drives the session's
//! renderer from the streamed events.

use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::ChatEvent;
use crate::relay::{decode_event, SseDecoder};
use crate::renderer::{ChatSession, TurnStatus};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// Entry of `GET /api/models`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelList {
    pub default: String,
    pub models: Vec<ModelInfo>,
}

pub struct ChatClient {
    http: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn models(&self) -> Result<ModelList, ClientError> {
        let response = self.http.get(self.url("/api/models")).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Send one user message and stream the reply into `session`.
    ///
    /// `on_event` runs after each event has been applied, so the session
    /// already reflects it. A stream that ends without a terminal event
    /// closes the turn as failed.
    pub async fn send<F>(
        &self,
        session: &mut ChatSession,
        text: &str,
        mut on_event: F,
    ) -> Result<TurnStatus, ClientError>
    where
        F: FnMut(&ChatEvent, &ChatSession),
    {
        let body = session.begin_turn(text);

        let response = match self.http.post(self.url("/api/chat")).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                session.abort_turn();
                return Err(e.into());
            }
        };
        let response = match check_status(response).await {
            Ok(response) => response,
            Err(e) => {
                session.abort_turn();
                return Err(e);
            }
        };

        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "Chat stream broke");
                    session.abort_turn();
                    return Err(e.into());
                }
            };
            for frame in decoder.push(&chunk) {
                if let Some(status) = apply_frame(session, &frame, &mut on_event) {
                    return Ok(status);
                }
            }
        }

        if let Some(frame) = decoder.finish() {
            if let Some(status) = apply_frame(session, &frame, &mut on_event) {
                return Ok(status);
            }
        }

        debug!("Chat stream ended without a terminal event");
        session.abort_turn();
        Ok(TurnStatus::Failed)
    }
}

/// Apply one frame; returns the final status once the turn is over
fn apply_frame<F>(
    session: &mut ChatSession,
    frame: &crate::relay::SseFrame,
    on_event: &mut F,
) -> Option<TurnStatus>
where
    F: FnMut(&ChatEvent, &ChatSession),
{
    let Some(event) = decode_event(frame) else {
        debug!(data = %frame.data, "Skipping undecodable frame");
        return None;
    };
    let status = session.apply(&event)?;
    on_event(&event, session);
    status.is_finished().then_some(status)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

//! HTTP server - the chat endpoint plus the site's small JSON API.
//!
//! `POST /api/chat` normalizes the incoming history, starts a turn on the
//! engine and relays its events as server-sent events. Every route sits
//! behind the role gate in [`crate::access`].

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::access::{self, Role};
use crate::config::AppConfig;
use crate::engine::{ChatEngine, TurnRequest};
use crate::message::normalize;
use crate::notify::{Notification, Notifier, NotifyError, OutboxNotifier};
use crate::places::PlacesClient;
use crate::prompt::{build_system_prompt, ToolHint};
use crate::providers::{resolve_model, GeminiBackend, DEFAULT_MODEL, MODEL_CATALOG};
use crate::relay::relay;
use crate::store::{get_event, DocumentStore, MemoryStore, StoreError, UploadOutcome, WriteOutcome};
use crate::tools::ToolRegistry;

/// Connect timeout for outbound calls. The turn budget bounds the rest.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the server
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<ChatEngine>,
    pub store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl ProxyState {
    pub fn new(config: AppConfig, engine: ChatEngine, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            store,
            notifier: Arc::new(OutboxNotifier::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Wire up the Gemini backend, the places tool and an in-memory store.
    /// Fails when either API key is missing.
    pub fn from_config(config: AppConfig) -> Result<Self, ProxyError> {
        config.validate()?;
        let model_key = config.model.api_key.clone().unwrap_or_default();
        let places_key = config.places.api_key.clone().unwrap_or_default();

        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let backend = GeminiBackend::new(client.clone(), config.model.base_url.clone(), model_key);
        let places = PlacesClient::new(client, config.places.clone(), places_key);

        let engine = ChatEngine::new(Arc::new(backend), ToolRegistry::with_places(places))
            .with_limits(config.chat.max_tool_rounds, config.chat.turn_timeout());

        Ok(Self::new(config, engine, Arc::new(MemoryStore::new())))
    }
}

/// Errors that can occur in request handling
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Conversation has no messages")]
    EmptyConversation,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ProxyError::Config(_) | ProxyError::Client(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }
            ProxyError::InvalidBody(_) | ProxyError::EmptyConversation => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            ProxyError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ProxyError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            ProxyError::Notify(NotifyError::Delivery(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "notify_error")
            }
            ProxyError::Notify(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        };

        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": kind
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub model: Option<String>,
    /// Unknown hints fall back to auto
    #[serde(default)]
    pub tool_hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest {
    path: String,
    data_url: String,
}

/// Create the router with all endpoints
pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/models", get(list_models))
        .route("/api/events/{event_id}", get(event_by_id))
        .route("/api/auth/check", get(auth_check))
        .route(
            "/api/admin/collections/{collection}",
            get(list_documents).post(save_ordered),
        )
        .route(
            "/api/admin/collections/{collection}/{id}",
            get(get_document).put(put_document).delete(delete_document),
        )
        .route("/api/admin/uploads", post(upload))
        .route("/api/admin/notify", post(notify))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(access::gate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "lumina",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn not_found() -> ProxyError {
    ProxyError::NotFound("route".to_string())
}

async fn chat(State(state): State<ProxyState>, body: String) -> Result<Response, ProxyError> {
    let request: ChatRequest =
        serde_json::from_str(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;

    if request.messages.is_empty() {
        return Err(ProxyError::EmptyConversation);
    }

    let history = normalize(&request.messages);
    let model = resolve_model(request.model.as_deref());
    let hint = request
        .tool_hint
        .as_deref()
        .and_then(ToolHint::parse)
        .unwrap_or_default();
    let system_prompt = build_system_prompt(state.config.chat.system_prompt.as_deref(), hint);

    info!(
        model = %model,
        turns = history.len(),
        hint = hint.label(),
        "Chat request"
    );

    let events = state.engine.run(TurnRequest {
        history,
        model,
        system_prompt,
    });
    Ok(relay(events).into_response())
}

async fn list_models() -> impl IntoResponse {
    Json(json!({
        "default": DEFAULT_MODEL,
        "models": MODEL_CATALOG
    }))
}

async fn event_by_id(
    State(state): State<ProxyState>,
    Path(event_id): Path<String>,
) -> Result<Response, ProxyError> {
    match get_event(state.store.as_ref(), &event_id).await {
        Ok(Some(event)) => Ok(Json(event).into_response()),
        Ok(None) => Err(ProxyError::NotFound(format!("event {}", event_id))),
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "Failed to load event");
            Err(e.into())
        }
    }
}

async fn auth_check(headers: HeaderMap) -> impl IntoResponse {
    let role = Role::from_headers(&headers);
    Json(json!({
        "isLoggedIn": role.is_logged_in(),
        "role": role
    }))
}

fn write_response(outcome: WriteOutcome) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome)).into_response()
}

async fn list_documents(
    State(state): State<ProxyState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Value>>, ProxyError> {
    Ok(Json(state.store.get_data(&collection).await?))
}

async fn save_ordered(
    State(state): State<ProxyState>,
    Path(collection): Path<String>,
    body: String,
) -> Result<Response, ProxyError> {
    let items: Vec<Value> =
        serde_json::from_str(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;
    let result = state.store.save_ordered_data(&collection, items).await;
    if let Err(e) = &result {
        warn!(collection = %collection, error = %e, "Batch save rejected");
    }
    Ok(write_response(WriteOutcome::from_result(result.map(|_| None))))
}

async fn get_document(
    State(state): State<ProxyState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, ProxyError> {
    state
        .store
        .get_data_by_id(&collection, &id)
        .await?
        .map(Json)
        .ok_or_else(|| ProxyError::NotFound(format!("{}/{}", collection, id)))
}

async fn put_document(
    State(state): State<ProxyState>,
    Path((collection, id)): Path<(String, String)>,
    body: String,
) -> Result<Response, ProxyError> {
    let data: Value =
        serde_json::from_str(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;
    let result = state.store.save_data(&collection, &id, data).await;
    Ok(write_response(WriteOutcome::from_result(result.map(|_| Some(id)))))
}

async fn delete_document(
    State(state): State<ProxyState>,
    Path((collection, id)): Path<(String, String)>,
) -> Response {
    let result = state.store.delete_data(&collection, &id).await;
    write_response(WriteOutcome::from_result(result.map(|_| None)))
}

async fn upload(State(state): State<ProxyState>, body: String) -> Result<Response, ProxyError> {
    let request: UploadRequest =
        serde_json::from_str(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;
    let outcome = UploadOutcome::from(state.store.upload_file(&request.path, &request.data_url).await);
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(outcome)).into_response())
}

async fn notify(State(state): State<ProxyState>, body: String) -> Result<Response, ProxyError> {
    let notification: Notification =
        serde_json::from_str(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;
    state.notifier.send(&notification).await?;
    Ok(Json(json!({"success": true})).into_response())
}

/// Start the server and run until Ctrl-C
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = ProxyState::from_config(config)?;

    info!(
        rounds = state.config.chat.max_tool_rounds,
        timeout_secs = state.config.chat.turn_timeout_secs,
        "Chat engine ready"
    );

    let app = create_router(state);

    info!(address = %addr, "Starting Lumina server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ProxyError::EmptyConversation.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::NotFound("x".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::Store(StoreError::NotAnObject)
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::Notify(NotifyError::EmptySubject)
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Notify(NotifyError::Delivery("relay down".to_string()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_chat_request_is_lenient() {
        let request: ChatRequest = serde_json::from_str(r#"{"messages": [{"role": "user"}]}"#).unwrap();
        assert_eq!(request.messages.len(), 1);
        assert!(request.model.is_none());

        let request: ChatRequest =
            serde_json::from_str(r#"{"messages": [], "toolHint": "telepathy"}"#).unwrap();
        assert_eq!(
            request.tool_hint.as_deref().and_then(ToolHint::parse),
            None
        );
    }

    #[test]
    fn test_from_config_requires_keys() {
        let result = ProxyState::from_config(AppConfig::default());
        assert!(matches!(result, Err(ProxyError::Config(_))));
    }

    #[tokio::test]
    async fn test_from_config_builds_state() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("m".to_string());
        config.places.api_key = Some("p".to_string());
        let state = ProxyState::from_config(config).unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(state.engine.tools().len(), 1);
    }
}

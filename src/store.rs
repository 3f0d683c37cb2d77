//! Document store interface used by the site's content pages.
//!
//! Collections hold arbitrary JSON objects keyed by id. Reads return the
//! document with its id merged in. [`MemoryStore`] is the in-process backend
//! used by the server and tests.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Collection holding [`LiveEvent`] documents
pub const EVENTS_COLLECTION: &str = "events";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document must be a JSON object")]
    NotAnObject,

    #[error("Batch item {0} has no string id")]
    MissingId(usize),

    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("Invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("No file at {0}")]
    FileNotFound(String),

    #[error("Malformed {collection} document {id}: {source}")]
    Malformed {
        collection: String,
        id: String,
        source: serde_json::Error,
    },
}

/// `{success, id?, error?}` result of a write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteOutcome {
    pub fn from_result(result: Result<Option<String>, StoreError>) -> Self {
        match result {
            Ok(id) => Self {
                success: true,
                id,
                error: None,
            },
            Err(e) => Self {
                success: false,
                id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// `{success, url?, error?}` result of an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<String, StoreError>> for UploadOutcome {
    fn from(result: Result<String, StoreError>) -> Self {
        match result {
            Ok(url) => Self {
                success: true,
                url: Some(url),
                error: None,
            },
            Err(e) => Self {
                success: false,
                url: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in a collection
    async fn get_data(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    async fn get_data_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Create or replace a document
    async fn save_data(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    /// Deleting a missing document succeeds
    async fn delete_data(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Batch upsert; every item must carry its own `id`. All or nothing.
    async fn save_ordered_data(&self, collection: &str, items: Vec<Value>) -> Result<(), StoreError>;

    /// Store a `data:` URL payload and return its public URL
    async fn upload_file(&self, path: &str, data_url: &str) -> Result<String, StoreError>;

    async fn delete_file(&self, path: &str) -> Result<(), StoreError>;
}

/// Broadcast state of a live event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Live,
    Ended,
}

/// A live-streamed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub youtube_url: String,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Look up a live event by id
pub async fn get_event(store: &dyn DocumentStore, id: &str) -> Result<Option<LiveEvent>, StoreError> {
    let Some(doc) = store.get_data_by_id(EVENTS_COLLECTION, id).await? else {
        return Ok(None);
    };
    serde_json::from_value(doc)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            collection: EVENTS_COLLECTION.to_string(),
            id: id.to_string(),
            source,
        })
}

/// Decoded `data:<mime>;base64,<payload>` URL
#[derive(Debug, Clone, PartialEq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let rest = raw
            .strip_prefix("data:")
            .ok_or_else(|| StoreError::InvalidDataUrl("missing data: prefix".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| StoreError::InvalidDataUrl("missing payload".to_string()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| StoreError::InvalidDataUrl("only base64 payloads are supported".to_string()))?;

        Ok(Self {
            mime: if mime.is_empty() {
                "application/octet-stream".to_string()
            } else {
                mime.to_string()
            },
            bytes: STANDARD.decode(payload.trim())?,
        })
    }
}

type Collection = BTreeMap<String, Map<String, Value>>;

/// In-process store. Documents in a collection are returned in id order.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    files: RwLock<HashMap<String, DataUrl>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Public URL of an uploaded path
    pub fn file_url(path: &str) -> String {
        format!("memory://{}", path.trim_start_matches('/'))
    }

    /// Raw file contents, for serving uploads back
    pub async fn file(&self, path: &str) -> Option<DataUrl> {
        self.files.read().await.get(path.trim_start_matches('/')).cloned()
    }
}

fn with_id(id: &str, doc: &Map<String, Value>) -> Value {
    let mut out = Map::with_capacity(doc.len() + 1);
    out.insert("id".to_string(), Value::String(id.to_string()));
    for (key, value) in doc {
        if key != "id" {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn into_object(data: Value) -> Result<Map<String, Value>, StoreError> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_data(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().map(|(id, doc)| with_id(id, doc)).collect())
            .unwrap_or_default())
    }

    async fn get_data_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        let doc = collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| with_id(id, doc));
        if doc.is_none() {
            debug!(collection, id, "No such document");
        }
        Ok(doc)
    }

    async fn save_data(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let doc = into_object(data)?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        debug!(collection, id, "Saved document");
        Ok(())
    }

    async fn delete_data(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        if let Some(docs) = self.collections.write().await.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn save_ordered_data(&self, collection: &str, items: Vec<Value>) -> Result<(), StoreError> {
        // Validate the whole batch before touching the collection
        let mut batch = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let doc = into_object(item)?;
            let id = doc
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or(StoreError::MissingId(index))?
                .to_string();
            batch.push((id, doc));
        }

        let count = batch.len();
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        for (id, doc) in batch {
            docs.insert(id, doc);
        }
        info!(collection, count, "Batch saved documents");
        Ok(())
    }

    async fn upload_file(&self, path: &str, data_url: &str) -> Result<String, StoreError> {
        let file = DataUrl::parse(data_url)?;
        let key = path.trim_start_matches('/').to_string();
        debug!(path = %key, mime = %file.mime, bytes = file.bytes.len(), "Stored upload");
        self.files.write().await.insert(key, file);
        Ok(Self::file_url(path))
    }

    async fn delete_file(&self, path: &str) -> Result<(), StoreError> {
        let key = path.trim_start_matches('/');
        match self.files.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::FileNotFound(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_read_back_with_id() {
        let store = MemoryStore::new();
        store
            .save_data("services", "wedding", json!({"name": "Wedding", "price": 25000}))
            .await
            .unwrap();

        let doc = store.get_data_by_id("services", "wedding").await.unwrap().unwrap();
        assert_eq!(doc, json!({"id": "wedding", "name": "Wedding", "price": 25000}));
        assert!(store.get_data_by_id("services", "nope").await.unwrap().is_none());
        assert!(store.get_data("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_non_object() {
        let store = MemoryStore::new();
        let err = store.save_data("c", "x", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnObject));
        assert_eq!(
            WriteOutcome::from_result(Err(err)),
            WriteOutcome {
                success: false,
                id: None,
                error: Some("Document must be a JSON object".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.save_data("c", "a", json!({})).await.unwrap();
        store.delete_data("c", "a").await.unwrap();
        store.delete_data("c", "a").await.unwrap();
        store.delete_data("missing", "a").await.unwrap();
        assert!(store.get_data("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ordered_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let err = store
            .save_ordered_data("faq", vec![json!({"id": "q1"}), json!({"question": "no id"})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingId(1)));
        assert!(store.get_data("faq").await.unwrap().is_empty());

        store
            .save_ordered_data(
                "faq",
                vec![json!({"id": "q2", "order": 2}), json!({"id": "q1", "order": 1})],
            )
            .await
            .unwrap();
        let docs = store.get_data("faq").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["id"], "q1");
    }

    #[tokio::test]
    async fn test_upload_data_url() {
        let store = MemoryStore::new();
        let url = store
            .upload_file("/gallery/a.png", "data:image/png;base64,aGVsbG8=")
            .await
            .unwrap();
        assert_eq!(url, "memory://gallery/a.png");

        let file = store.file("gallery/a.png").await.unwrap();
        assert_eq!(file.mime, "image/png");
        assert_eq!(file.bytes, b"hello");

        store.delete_file("gallery/a.png").await.unwrap();
        assert!(matches!(
            store.delete_file("gallery/a.png").await,
            Err(StoreError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_data_url_errors() {
        assert!(matches!(
            DataUrl::parse("image/png;base64,xx"),
            Err(StoreError::InvalidDataUrl(_))
        ));
        assert!(matches!(
            DataUrl::parse("data:text/plain,hello"),
            Err(StoreError::InvalidDataUrl(_))
        ));
        assert!(matches!(
            DataUrl::parse("data:image/png;base64,!!!"),
            Err(StoreError::Decode(_))
        ));
        let outcome = UploadOutcome::from(DataUrl::parse("nope").map(|_| String::new()));
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_get_event() {
        let store = MemoryStore::new();
        store
            .save_data(
                EVENTS_COLLECTION,
                "reception-live",
                json!({
                    "title": "Reception",
                    "description": "Streaming live",
                    "youtubeUrl": "https://youtube.com/watch?v=abc",
                    "status": "live"
                }),
            )
            .await
            .unwrap();

        let event = get_event(&store, "reception-live").await.unwrap().unwrap();
        assert_eq!(event.id, "reception-live");
        assert_eq!(event.status, EventStatus::Live);
        assert!(event.scheduled_for.is_none());

        assert!(get_event(&store, "missing").await.unwrap().is_none());

        store
            .save_data(EVENTS_COLLECTION, "broken", json!({"title": "No url"}))
            .await
            .unwrap();
        assert!(matches!(
            get_event(&store, "broken").await,
            Err(StoreError::Malformed { .. })
        ));
    }
}

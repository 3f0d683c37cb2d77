//! Tool definitions and execution for Lumina
//!
//! A tool is a named capability the model may call mid-turn. Lumina
//! registers exactly one, `get_places`, but the engine only sees the
//! [`Tool`] trait and the [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::places::PlacesClient;

/// Name the model uses to call the places search
pub const GET_PLACES: &str = "get_places";

/// Errors executing a tool call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {0} failed: {1}")]
    Failed(String, String),
}

/// Tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Opaque thought signature that must accompany the call when it is replayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Declaration sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments
    fn parameters(&self) -> Value;

    async fn invoke(&self, args: &Value) -> Result<Value, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// `get_places`: venue search around the studio's region
pub struct GetPlacesTool {
    client: PlacesClient,
}

impl GetPlacesTool {
    pub fn new(client: PlacesClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GetPlacesTool {
    fn name(&self) -> &str {
        GET_PLACES
    }

    fn description(&self) -> &str {
        "Search for photography locations, parks, studios, or venues using Google Maps."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user search query, e.g. \"sunset spots in Hyderabad\" or \"studios near Gachibowli\""
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: &Value) -> Result<Value, ToolError> {
        let response = self.client.invoke(args).await;
        serde_json::to_value(response)
            .map_err(|e| ToolError::Failed(GET_PLACES.to_string(), e.to_string()))
    }
}

/// The set of tools offered to the model for a turn
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the places tool, as used by the server
    pub fn with_places(client: PlacesClient) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GetPlacesTool::new(client)));
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub async fn execute(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        tool.invoke(&call.arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacesConfig;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, args: &Value) -> Result<Value, ToolError> {
            Ok(args.clone())
        }
    }

    fn places_registry() -> ToolRegistry {
        let client = PlacesClient::new(reqwest::Client::new(), PlacesConfig::default(), "key");
        ToolRegistry::with_places(client)
    }

    #[test]
    fn test_places_definition() {
        let registry = places_registry();
        assert_eq!(registry.len(), 1);
        let defs = registry.definitions();
        assert_eq!(defs[0].name, GET_PLACES);
        assert_eq!(defs[0].parameters["required"], json!(["query"]));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments: json!({"a": 1}),
            signature: None,
        };
        assert_eq!(registry.execute(&call).await, Ok(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "bash".to_string(),
            arguments: json!({}),
            signature: None,
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("bash".to_string()));
        assert_eq!(err.to_string(), "Unknown tool: bash");
    }

    #[tokio::test]
    async fn test_places_tool_missing_query_payload() {
        let registry = places_registry();
        let call = ToolCall {
            id: "call_1".to_string(),
            name: GET_PLACES.to_string(),
            arguments: json!({}),
            signature: None,
        };
        let output = registry.execute(&call).await.unwrap();
        assert_eq!(output["found"], false);
        assert_eq!(output["count"], 0);
        assert_eq!(
            output["error"],
            "Missing search query. Please provide a location or place name."
        );
    }
}

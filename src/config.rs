//! Configuration loader with environment variable substitution.
//!
//! Loads configuration from:
//! 1. Default values
//! 2. `.lumina/config.yaml` in project directory
//! 3. `~/.lumina/config.yaml` in home directory
//! 4. Environment variables with `LUMINA_` prefix
//! 5. The well-known Google key variables

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the Gemini API key
pub const MODEL_KEY_ENV: &str = "GOOGLE_GENERATIVE_AI_API_KEY";

/// Environment variable holding the Places API key
pub const PLACES_KEY_ENV: &str = "GOOGLE_MAPS_API_KEY";

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub places: PlacesConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Hosted model backend (Gemini)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_model_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            api_key: None,
        }
    }
}

/// Places text-search backend
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlacesConfig {
    #[serde(default = "default_places_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Circle every search is biased toward (the studio's service region)
    #[serde(default)]
    pub bias: LocationBias,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_places_base_url() -> String {
    "https://places.googleapis.com".to_string()
}

fn default_max_results() -> u32 {
    5
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            base_url: default_places_base_url(),
            api_key: None,
            bias: LocationBias::default(),
            max_results: default_max_results(),
        }
    }
}

/// Fixed search bias circle
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LocationBias {
    #[serde(default = "default_bias_latitude")]
    pub latitude: f64,
    #[serde(default = "default_bias_longitude")]
    pub longitude: f64,
    #[serde(default = "default_bias_radius")]
    pub radius_meters: f64,
}

fn default_bias_latitude() -> f64 {
    17.3850
}

fn default_bias_longitude() -> f64 {
    78.4867
}

fn default_bias_radius() -> f64 {
    50_000.0
}

impl Default for LocationBias {
    fn default() -> Self {
        Self {
            latitude: default_bias_latitude(),
            longitude: default_bias_longitude(),
            radius_meters: default_bias_radius(),
        }
    }
}

/// Per-turn limits for the chat engine
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    /// Tool-call rounds allowed before the turn is forced to end
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Wall-clock budget for a whole turn
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    /// Replaces the built-in Lumina prompt when set
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_tool_rounds() -> u32 {
    5
}

fn default_turn_timeout() -> u64 {
    30
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            turn_timeout_secs: default_turn_timeout(),
            system_prompt: None,
        }
    }
}

impl ChatConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

/// Project-local config file
pub fn project_config_path() -> PathBuf {
    PathBuf::from(".lumina/config.yaml")
}

/// Load configuration from all sources
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    builder = builder
        .set_default("server.port", i64::from(default_port()))?
        .set_default("server.host", default_host())?
        .set_default("model.base_url", default_model_base_url())?
        .set_default("places.base_url", default_places_base_url())?
        .set_default("chat.max_tool_rounds", i64::from(default_max_tool_rounds()))?
        .set_default("chat.turn_timeout_secs", default_turn_timeout() as i64)?;

    let project_config = project_config_path();
    if project_config.exists() {
        builder = builder.add_source(File::from(project_config).required(false));
    }

    if let Some(home) = dirs::home_dir() {
        let home_config: PathBuf = home.join(".lumina/config.yaml");
        if home_config.exists() {
            builder = builder.add_source(File::from(home_config).required(false));
        }
    }

    // e.g. LUMINA_SERVER__PORT=8080, LUMINA_PLACES__MAX_RESULTS=3
    builder = builder.add_source(
        Environment::with_prefix("LUMINA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    if let Ok(key) = std::env::var(MODEL_KEY_ENV) {
        builder = builder.set_override("model.api_key", key)?;
    }
    if let Ok(key) = std::env::var(PLACES_KEY_ENV) {
        builder = builder.set_override("places.api_key", key)?;
    }

    builder.build()?.try_deserialize()
}

impl AppConfig {
    /// Reject configurations the server cannot run with.
    ///
    /// Missing credentials are fatal here, before any request is accepted,
    /// since a turn has no way to degrade once streaming has begun.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Message(format!(
                "No model API key configured. Set {} or model.api_key.",
                MODEL_KEY_ENV
            )));
        }
        if self.places.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Message(format!(
                "No places API key configured. Set {} or places.api_key.",
                PLACES_KEY_ENV
            )));
        }
        if self.chat.max_tool_rounds == 0 {
            return Err(ConfigError::Message(
                "chat.max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.chat.turn_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "chat.turn_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.model.api_key = Some("model-key".to_string());
        config.places.api_key = Some("places-key".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.chat.max_tool_rounds, 5);
        assert_eq!(config.chat.turn_timeout(), Duration::from_secs(30));
        assert_eq!(config.places.max_results, 5);
    }

    #[test]
    fn test_default_bias_is_service_region() {
        let bias = LocationBias::default();
        assert_eq!(bias.latitude, 17.3850);
        assert_eq!(bias.longitude, 78.4867);
        assert_eq!(bias.radius_meters, 50_000.0);
    }

    #[test]
    fn test_places_config_from_json() {
        let json = r#"{
            "base_url": "http://localhost:9999",
            "api_key": "abc",
            "bias": { "latitude": 18.53, "longitude": 77.89 }
        }"#;

        let config: PlacesConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base_url, "http://localhost:9999");
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.bias.latitude, 18.53);
        // radius falls back to its default
        assert_eq!(config.bias.radius_meters, 50_000.0);
        assert_eq!(config.max_results, 5);
    }

    #[test]
    fn test_chat_config_from_yaml() {
        let yaml = "max_tool_rounds: 2\nsystem_prompt: Be brief.\n";
        let config: ChatConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_tool_rounds, 2);
        assert_eq!(config.turn_timeout_secs, 30);
        assert_eq!(config.system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_validate_ok() {
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_model_key() {
        let mut config = configured();
        config.model.api_key = None;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(MODEL_KEY_ENV), "{}", err);
    }

    #[test]
    fn test_validate_empty_places_key() {
        let mut config = configured();
        config.places.api_key = Some(String::new());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(PLACES_KEY_ENV), "{}", err);
    }

    #[test]
    fn test_validate_zero_rounds() {
        let mut config = configured();
        config.chat.max_tool_rounds = 0;
        assert!(config.validate().is_err());
    }
}

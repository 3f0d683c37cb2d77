//! Places search - the one tool Lumina can call.
//!
//! Wraps the Places (New) text-search endpoint. Every outcome is returned as
//! a [`PlacesResponse`] payload: the caller is mid-stream, so neither a bad
//! argument nor a backend failure may surface as an error.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LocationBias, PlacesConfig};

/// Argument keys accepted in place of `query`, in lookup order
pub const QUERY_ALIASES: [&str; 5] = ["query", "location", "place", "search", "keyword"];

pub const MISSING_QUERY_MESSAGE: &str =
    "Missing search query. Please provide a location or place name.";

pub const SEARCH_FAILED_MESSAGE: &str = "Failed to search places.";

const FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.rating,places.userRatingCount,places.location,places.photos,places.priceLevel,places.types";

/// Errors talking to the places backend. Never leaves this module.
#[derive(Error, Debug)]
pub enum PlacesError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Places backend returned {0}")]
    Status(reqwest::StatusCode),

    #[error("Place {0} has no location")]
    MissingLocation(String),
}

/// Geographic point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A venue as shown to the model and the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceResult {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_count: Option<u64>,
    pub location: LatLng,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_level: Option<String>,
    #[serde(default)]
    pub photo_refs: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

/// Tool output handed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesResponse {
    pub found: bool,
    #[serde(default)]
    pub count: usize,
    pub places: Vec<PlaceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlacesResponse {
    pub fn from_places(places: Vec<PlaceResult>) -> Self {
        Self {
            found: !places.is_empty(),
            count: places.len(),
            places,
            error: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            found: false,
            count: 0,
            places: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

// Backend wire format

#[derive(Debug, Deserialize)]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<BackendPlace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendPlace {
    #[serde(default)]
    id: String,
    #[serde(default)]
    display_name: Option<LocalizedText>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    user_rating_count: Option<u64>,
    #[serde(default)]
    location: Option<BackendLatLng>,
    #[serde(default)]
    photos: Vec<BackendPhoto>,
    #[serde(default)]
    price_level: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendLatLng {
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct BackendPhoto {
    name: String,
}

impl TryFrom<BackendPlace> for PlaceResult {
    type Error = PlacesError;

    /// A place without coordinates cannot be mapped or routed to.
    fn try_from(place: BackendPlace) -> Result<Self, Self::Error> {
        let location = place
            .location
            .map(|l| LatLng {
                lat: l.latitude,
                lng: l.longitude,
            })
            .ok_or_else(|| PlacesError::MissingLocation(place.id.clone()))?;

        Ok(PlaceResult {
            id: place.id,
            name: place
                .display_name
                .and_then(|d| d.text)
                .unwrap_or_else(|| "Unknown Place".to_string()),
            address: place.formatted_address.unwrap_or_default(),
            rating: place.rating,
            rating_count: place.user_rating_count,
            location,
            price_level: place.price_level,
            photo_refs: place.photos.into_iter().take(1).map(|p| p.name).collect(),
            types: place.types,
        })
    }
}

/// Pull the search text out of model-supplied arguments.
///
/// The model does not always use the declared parameter name, so the common
/// misnamings are accepted too. The first non-blank string wins.
pub fn resolve_query(args: &Value) -> Option<String> {
    QUERY_ALIASES.iter().find_map(|key| {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
    })
}

/// Build the text-search request body
pub fn search_body(query: &str, bias: &LocationBias, max_results: u32) -> Value {
    json!({
        "textQuery": query,
        "locationBias": {
            "circle": {
                "center": { "latitude": bias.latitude, "longitude": bias.longitude },
                "radius": bias.radius_meters
            }
        },
        "maxResultCount": max_results
    })
}

/// Client for the places backend. Cheap to clone; holds no per-call state.
#[derive(Clone)]
pub struct PlacesClient {
    http: Client,
    config: PlacesConfig,
    api_key: String,
}

impl PlacesClient {
    pub fn new(http: Client, config: PlacesConfig, api_key: impl Into<String>) -> Self {
        Self {
            http,
            config,
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/places:searchText",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// One outbound search. No retries: the backend's behaviour under
    /// repeated identical requests has never been verified.
    pub async fn search(&self, query: &str) -> Result<Vec<PlaceResult>, PlacesError> {
        let body = search_body(query, &self.config.bias, self.config.max_results);
        debug!(url = %self.endpoint(), query = %query, "Searching places");

        let response = self
            .http
            .post(self.endpoint())
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlacesError::Status(response.status()));
        }

        let parsed: SearchTextResponse = response.json().await?;
        parsed
            .places
            .into_iter()
            .map(PlaceResult::try_from)
            .collect()
    }

    /// Tool entry point: never fails, always returns a payload.
    pub async fn invoke(&self, args: &Value) -> PlacesResponse {
        let Some(query) = resolve_query(args) else {
            warn!(args = %args, "Places tool called without a query");
            return PlacesResponse::failure(MISSING_QUERY_MESSAGE);
        };

        info!(query = %query, "Searching places");
        match self.search(&query).await {
            Ok(places) => PlacesResponse::from_places(places),
            Err(e) => {
                warn!(error = %e, "Place search failed");
                PlacesResponse::failure(SEARCH_FAILED_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_query_direct() {
        let args = json!({"query": "sunset spots in Hyderabad"});
        assert_eq!(
            resolve_query(&args).as_deref(),
            Some("sunset spots in Hyderabad")
        );
    }

    #[test]
    fn test_resolve_query_aliases() {
        for key in ["location", "place", "search", "keyword"] {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), json!("Gachibowli studios"));
            let args = Value::Object(map);
            assert_eq!(
                resolve_query(&args).as_deref(),
                Some("Gachibowli studios"),
                "alias {} should resolve",
                key
            );
        }
    }

    #[test]
    fn test_resolve_query_prefers_query_key() {
        let args = json!({"location": "b", "query": "a"});
        assert_eq!(resolve_query(&args).as_deref(), Some("a"));
    }

    #[test]
    fn test_resolve_query_skips_blank_and_non_string() {
        let args = json!({"query": "   ", "location": 7, "place": "lake"});
        assert_eq!(resolve_query(&args).as_deref(), Some("lake"));
        assert_eq!(resolve_query(&json!({})), None);
        assert_eq!(resolve_query(&json!(null)), None);
    }

    #[test]
    fn test_search_body_uses_bias() {
        let body = search_body("parks", &LocationBias::default(), 5);
        assert_eq!(body["textQuery"], "parks");
        assert_eq!(body["maxResultCount"], 5);
        let circle = &body["locationBias"]["circle"];
        assert_eq!(circle["center"]["latitude"], 17.3850);
        assert_eq!(circle["center"]["longitude"], 78.4867);
        assert_eq!(circle["radius"], 50_000.0);
    }

    #[test]
    fn test_backend_place_mapping() {
        let raw = json!({
            "id": "abc",
            "displayName": {"text": "Lumbini Park", "languageCode": "en"},
            "formattedAddress": "Hussain Sagar, Hyderabad",
            "rating": 4.3,
            "userRatingCount": 1200,
            "location": {"latitude": 17.41, "longitude": 78.47},
            "photos": [{"name": "photo/1"}, {"name": "photo/2"}],
            "priceLevel": "PRICE_LEVEL_INEXPENSIVE",
            "types": ["park"]
        });
        let place =
            PlaceResult::try_from(serde_json::from_value::<BackendPlace>(raw).unwrap()).unwrap();
        assert_eq!(place.name, "Lumbini Park");
        assert_eq!(place.address, "Hussain Sagar, Hyderabad");
        assert_eq!(place.rating_count, Some(1200));
        assert_eq!(place.location, LatLng { lat: 17.41, lng: 78.47 });
        assert_eq!(place.photo_refs, vec!["photo/1".to_string()]);
        assert_eq!(place.types, vec!["park".to_string()]);
    }

    #[test]
    fn test_backend_place_without_name() {
        let raw = json!({"id": "x", "location": {"latitude": 17.4, "longitude": 78.5}});
        let place =
            PlaceResult::try_from(serde_json::from_value::<BackendPlace>(raw).unwrap()).unwrap();
        assert_eq!(place.name, "Unknown Place");
        assert!(place.rating.is_none());
        assert!(place.photo_refs.is_empty());
    }

    #[test]
    fn test_backend_place_without_location_is_rejected() {
        let raw = json!({"id": "x", "displayName": {"text": "Somewhere"}});
        let err =
            PlaceResult::try_from(serde_json::from_value::<BackendPlace>(raw).unwrap()).unwrap_err();
        assert!(matches!(err, PlacesError::MissingLocation(id) if id == "x"));
    }

    #[test]
    fn test_failure_payload_shape() {
        let payload = serde_json::to_value(PlacesResponse::failure(MISSING_QUERY_MESSAGE)).unwrap();
        assert_eq!(
            payload,
            json!({
                "found": false,
                "count": 0,
                "places": [],
                "error": "Missing search query. Please provide a location or place name."
            })
        );
    }

    #[test]
    fn test_success_payload_omits_error() {
        let payload = serde_json::to_value(PlacesResponse::from_places(Vec::new())).unwrap();
        assert!(payload.get("error").is_none());
        assert_eq!(payload["found"], false);
    }

    #[tokio::test]
    async fn test_invoke_missing_query_makes_no_request() {
        // Unroutable base URL: a request attempt would produce the
        // search-failed message instead of the missing-query one.
        let config = PlacesConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..PlacesConfig::default()
        };
        let client = PlacesClient::new(Client::new(), config, "key");
        let response = client.invoke(&json!({})).await;
        assert_eq!(response, PlacesResponse::failure(MISSING_QUERY_MESSAGE));
    }

    #[tokio::test]
    async fn test_invoke_unreachable_backend() {
        let config = PlacesConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..PlacesConfig::default()
        };
        let client = PlacesClient::new(Client::new(), config, "key");
        let response = client.invoke(&json!({"query": "parks"})).await;
        assert_eq!(response, PlacesResponse::failure(SEARCH_FAILED_MESSAGE));
    }
}

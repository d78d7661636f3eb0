//! Place-name to coordinates lookup via the Open-Meteo geocoding API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{require_str, Result, Tool, ToolContext};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

#[derive(Debug, Clone)]
pub struct GeocodeTool {
    http: reqwest::Client,
}

impl GeocodeTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    admin1: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

#[async_trait]
impl Tool for GeocodeTool {
    fn name(&self) -> &'static str {
        "geocode_place"
    }

    fn description(&self) -> &'static str {
        "Resolves a city or place name to latitude/longitude coordinates."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "place": {
                    "type": "string",
                    "description": "City or place name, e.g. \"Bengaluru\"."
                }
            },
            "required": ["place"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let place = require_str(&params, "place")?;
        debug!(place, "geocoding place name");

        let response: GeocodingResponse = self
            .http
            .get(GEOCODING_URL)
            .query(&[("name", place), ("count", "1"), ("format", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.results.into_iter().next() {
            Some(hit) => Ok(json!({
                "name": hit.name,
                "latitude": hit.latitude,
                "longitude": hit.longitude,
                "country": hit.country,
                "region": hit.admin1,
                "timezone": hit.timezone,
            })),
            None => Ok(json!({
                "error": true,
                "message": format!("No location found for \"{place}\""),
            })),
        }
    }
}

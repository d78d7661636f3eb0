//! Current weather lookup via the Open-Meteo forecast API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{require_f64, Result, Tool, ToolContext, ToolError};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone)]
pub struct WeatherTool {
    http: reqwest::Client,
}

impl WeatherTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
    #[serde(default)]
    winddirection: f64,
    weathercode: i64,
    #[serde(default)]
    is_day: i64,
    time: String,
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "get_weather"
    }

    fn description(&self) -> &'static str {
        "Returns current weather conditions for a latitude/longitude pair."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": {"type": "number", "description": "Latitude in decimal degrees."},
                "longitude": {"type": "number", "description": "Longitude in decimal degrees."}
            },
            "required": ["latitude", "longitude"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let latitude = require_f64(&params, "latitude")?;
        let longitude = require_f64(&params, "longitude")?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(ToolError::InvalidParams(format!(
                "coordinates out of range: {latitude}, {longitude}"
            )));
        }
        debug!(latitude, longitude, "fetching current weather");

        let response: ForecastResponse = self
            .http
            .get(FORECAST_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.current_weather {
            Some(current) => Ok(json!({
                "temperatureCelsius": current.temperature,
                "windSpeedKmh": current.windspeed,
                "windDirectionDegrees": current.winddirection,
                "weatherCode": current.weathercode,
                "isDay": current.is_day == 1,
                "observedAt": current.time,
            })),
            None => Ok(json!({
                "error": true,
                "message": "Weather service returned no current conditions",
            })),
        }
    }
}

//! Weather lookups against an OpenWeatherMap-compatible provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Config, Error, Result};

/// Number of forecast entries returned (3-hour steps, so one day ahead).
pub const FORECAST_ENTRIES: usize = 8;

const DEFAULT_ICON: &str = "01d";
const DEFAULT_DESCRIPTION: &str = "Unknown";

/// Weather endpoint request body.
#[derive(Debug, Default, Deserialize)]
pub struct WeatherRequest {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub city: Option<String>,
}

/// Where to look the weather up.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherLocation {
    Coordinates { lat: f64, lon: f64 },
    City(String),
}

impl WeatherLocation {
    /// Coordinates win when both are present, then the city, then the default city.
    pub fn resolve(request: &WeatherRequest, default_city: &str) -> Self {
        match (request.lat, request.lon) {
            (Some(lat), Some(lon)) => WeatherLocation::Coordinates { lat, lon },
            _ => WeatherLocation::City(
                request
                    .city
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or(default_city)
                    .to_string(),
            ),
        }
    }

    fn query_params(&self) -> Vec<(&'static str, String)> {
        match self {
            WeatherLocation::Coordinates { lat, lon } => {
                vec![("lat", lat.to_string()), ("lon", lon.to_string())]
            }
            WeatherLocation::City(city) => vec![("q", city.clone())],
        }
    }
}

// Provider payloads

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentConditions {
    #[serde(default)]
    pub name: Option<String>,
    pub main: MainReadings,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub clouds: Option<Clouds>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainReadings {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wind {
    #[serde(default)]
    pub speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Clouds {
    #[serde(default)]
    pub all: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub list: Vec<ForecastItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastItem {
    pub dt_txt: String,
    pub main: MainReadings,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: Option<String>,
}

// Normalized output

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentWeather {
    pub temp: i64,
    pub feels_like: i64,
    pub humidity: i64,
    pub wind_speed: i64,
    pub description: String,
    pub icon: String,
    pub rain_probability: i64,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastEntry {
    pub time: String,
    pub temp: i64,
    pub icon: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub current: CurrentWeather,
    pub forecast: Vec<ForecastEntry>,
}

/// Round to the nearest integer with halves going up, the way the dashboard does.
pub(crate) fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Convert metres per second to whole kilometres per hour.
pub fn wind_speed_kmh(speed_ms: f64) -> i64 {
    round_half_up(speed_ms * 3.6)
}

fn first_condition(conditions: &[Condition]) -> (String, String) {
    let condition = conditions.first();
    let description = condition
        .and_then(|c| c.description.clone())
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let icon = condition
        .and_then(|c| c.icon.clone())
        .unwrap_or_else(|| DEFAULT_ICON.to_string());
    (description, icon)
}

/// Flatten provider payloads into the dashboard's weather shape.
pub fn normalize(current: &CurrentConditions, forecast: &ForecastResponse) -> WeatherSnapshot {
    let (description, icon) = first_condition(&current.weather);

    let current_weather = CurrentWeather {
        temp: round_half_up(current.main.temp),
        feels_like: round_half_up(current.main.feels_like.unwrap_or(current.main.temp)),
        humidity: round_half_up(current.main.humidity.unwrap_or(0.0)),
        wind_speed: wind_speed_kmh(current.wind.as_ref().map(|w| w.speed).unwrap_or(0.0)),
        description,
        icon,
        rain_probability: round_half_up(current.clouds.as_ref().map(|c| c.all).unwrap_or(0.0)),
        city: current.name.clone().unwrap_or_default(),
    };

    let forecast = forecast
        .list
        .iter()
        .take(FORECAST_ENTRIES)
        .map(|item| {
            let (description, icon) = first_condition(&item.weather);
            ForecastEntry {
                time: item.dt_txt.clone(),
                temp: round_half_up(item.main.temp),
                icon,
                description,
            }
        })
        .collect();

    WeatherSnapshot {
        current: current_weather,
        forecast,
    }
}

/// Source of raw weather data.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, location: &WeatherLocation) -> Result<CurrentConditions>;

    async fn forecast(&self, location: &WeatherLocation) -> Result<ForecastResponse>;
}

/// HTTP client for the weather provider.
pub struct OpenWeatherClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(http_client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Build a client from configuration, failing if the weather key is absent.
    pub fn from_config(config: &Config, http_client: reqwest::Client) -> Result<Self> {
        let api_key = config.require_weather_key()?;
        Ok(Self::new(http_client, &config.weather_base_url, api_key))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        location: &WeatherLocation,
        extra: &[(&'static str, String)],
    ) -> Result<T> {
        let mut params = location.query_params();
        params.push(("appid", self.api_key.clone()));
        params.push(("units", "metric".to_string()));
        params.extend_from_slice(extra);

        let response = self
            .http_client
            .get(format!("{}/{}", self.base_url, path))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ProviderError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Failed to fetch weather".to_string());
            return Err(Error::Upstream(message));
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current(&self, location: &WeatherLocation) -> Result<CurrentConditions> {
        self.get_json("weather", location, &[]).await
    }

    async fn forecast(&self, location: &WeatherLocation) -> Result<ForecastResponse> {
        self.get_json("forecast", location, &[("cnt", FORECAST_ENTRIES.to_string())])
            .await
    }
}

/// Look up current conditions and the short-range forecast.
///
/// A failing current-conditions call fails the lookup; a failing forecast
/// call only empties the forecast.
pub async fn fetch_weather(
    source: &dyn WeatherSource,
    request: &WeatherRequest,
    default_city: &str,
) -> Result<WeatherSnapshot> {
    let location = WeatherLocation::resolve(request, default_city);
    info!(location = ?location, "Fetching weather");

    let current = source.current(&location).await?;
    let forecast = match source.forecast(&location).await {
        Ok(forecast) => forecast,
        Err(e) => {
            warn!(error = %e, "Forecast unavailable");
            ForecastResponse::default()
        }
    };

    Ok(normalize(&current, &forecast))
}

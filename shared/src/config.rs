//! Configuration management for Lambda functions.

use std::env;
use std::time::Duration;

use crate::{Error, Result};

/// Default location used when a request carries no coordinates (central Lagos).
pub const DEFAULT_LATITUDE: f64 = 6.5244;
pub const DEFAULT_LONGITUDE: f64 = 3.3792;

/// Application configuration loaded from environment variables.
///
/// Handlers receive this explicitly; nothing below the binaries reads the
/// environment on its own.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenWeatherMap API key
    pub weather_api_key: Option<String>,
    /// TomTom API key
    pub traffic_api_key: Option<String>,
    /// LLM gateway API key
    pub llm_api_key: Option<String>,
    /// Chat completions endpoint of the LLM gateway
    pub llm_endpoint: String,
    /// Model requested from the gateway
    pub llm_model: String,
    /// Supabase project URL (PostgREST lives under `/rest/v1`)
    pub storage_url: Option<String>,
    /// Supabase service role key
    pub storage_key: Option<String>,
    /// Direct Postgres connection string, preferred over the REST store when set
    pub database_url: Option<String>,
    /// Weather provider base URL
    pub weather_base_url: String,
    /// Traffic provider base URL
    pub traffic_base_url: String,
    /// City queried when the caller sends neither coordinates nor a city
    pub default_city: String,
    /// Per-request timeout for outbound HTTP calls
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weather_api_key: None,
            traffic_api_key: None,
            llm_api_key: None,
            llm_endpoint: "https://ai.gateway.lovable.dev/v1/chat/completions".to_string(),
            llm_model: "google/gemini-2.5-flash".to_string(),
            storage_url: None,
            storage_key: None,
            database_url: None,
            weather_base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            traffic_base_url: "https://api.tomtom.com/traffic/services".to_string(),
            default_city: "Lagos,NG".to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            weather_api_key: get("OPENWEATHERMAP_API_KEY"),
            traffic_api_key: get("TOMTOM_API_KEY"),
            llm_api_key: get("LLM_GATEWAY_API_KEY"),
            llm_endpoint: get("LLM_GATEWAY_URL").unwrap_or(defaults.llm_endpoint),
            llm_model: get("LLM_MODEL").unwrap_or(defaults.llm_model),
            storage_url: get("SUPABASE_URL"),
            storage_key: get("SUPABASE_SERVICE_ROLE_KEY"),
            database_url: get("DATABASE_URL"),
            weather_base_url: get("WEATHER_API_BASE").unwrap_or(defaults.weather_base_url),
            traffic_base_url: get("TRAFFIC_API_BASE").unwrap_or(defaults.traffic_base_url),
            default_city: get("DEFAULT_CITY").unwrap_or(defaults.default_city),
            http_timeout: get("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }

    pub fn require_weather_key(&self) -> Result<&str> {
        require(&self.weather_api_key, "OpenWeatherMap API key not configured")
    }

    pub fn require_traffic_key(&self) -> Result<&str> {
        require(&self.traffic_api_key, "TomTom API key not configured")
    }

    pub fn require_llm_key(&self) -> Result<&str> {
        require(&self.llm_api_key, "LLM_GATEWAY_API_KEY not configured")
    }

    /// Build the shared outbound HTTP client.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()?)
    }
}

fn require<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::Config(message.to_string()))
}

//! Weather Lambda - Handles /weather endpoint.
//!
//! Looks up current conditions and a one-day forecast for a coordinate pair or
//! city name and returns them in the dashboard's units.

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{failure_response, is_preflight, json_response, preflight_response};
use shared::parse_body;
use shared::weather::{fetch_weather, OpenWeatherClient, WeatherRequest, WeatherSnapshot};
use shared::{load_config, Config};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Application state shared across requests.
struct AppState {
    config: Config,
    http_client: reqwest::Client,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = load_config().await?;
        let http_client = config.http_client()?;
        Ok(Self { config, http_client })
    }
}

async fn lookup(state: &AppState, request: &WeatherRequest) -> shared::Result<WeatherSnapshot> {
    let client = OpenWeatherClient::from_config(&state.config, state.http_client.clone())?;
    fetch_weather(&client, request, &state.config.default_city).await
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if is_preflight(&event) {
        return preflight_response();
    }

    let request: WeatherRequest = parse_body!(event.body());

    match lookup(&state, &request).await {
        Ok(snapshot) => json_response(200, &snapshot),
        Err(e) => {
            error!(error = %e, "Weather lookup failed");
            failure_response(&e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

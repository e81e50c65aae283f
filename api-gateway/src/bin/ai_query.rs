//! AI Query Lambda - Handles /ai-query endpoint.
//!
//! Answers a free-text question about the city, grounding the model in live
//! weather, traffic and recent incident reports.

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::assistant::{answer_query, AiQueryRequest, AiQueryResponse, ContextSources};
use shared::http::{failure_response, is_preflight, json_response, preflight_response};
use shared::parse_body;
use shared::traffic::{TomTomClient, TrafficSource};
use shared::weather::{OpenWeatherClient, WeatherSource};
use shared::{connect_store, load_config, Config, GatewayClient, IncidentStore};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across requests.
struct AppState {
    config: Config,
    http_client: reqwest::Client,
    store: Option<Arc<dyn IncidentStore>>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = load_config().await?;
        let http_client = config.http_client()?;

        // Incident context is optional; a broken store only empties it.
        let store = connect_store(&config, &http_client).await.unwrap_or_else(|e| {
            warn!(error = %e, "Incident store unavailable");
            None
        });

        Ok(Self {
            config,
            http_client,
            store,
        })
    }
}

async fn answer(state: &AppState, request: &AiQueryRequest) -> shared::Result<AiQueryResponse> {
    let model = GatewayClient::from_config(&state.config, state.http_client.clone())?;
    let weather = OpenWeatherClient::from_config(&state.config, state.http_client.clone()).ok();
    let traffic = TomTomClient::from_config(&state.config, state.http_client.clone()).ok();

    let sources = ContextSources {
        weather: weather.as_ref().map(|client| client as &dyn WeatherSource),
        traffic: traffic.as_ref().map(|client| client as &dyn TrafficSource),
        incidents: state.store.as_deref(),
    };

    answer_query(&model, &sources, request).await
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if is_preflight(&event) {
        return preflight_response();
    }

    let request: AiQueryRequest = parse_body!(event.body());

    match answer(&state, &request).await {
        Ok(response) => {
            info!(confidence = response.confidence, "AI query answered");
            json_response(200, &response)
        }
        Err(e) => {
            error!(error = %e, "AI query failed");
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

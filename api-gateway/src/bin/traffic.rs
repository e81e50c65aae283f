//! Traffic Lambda - Handles /traffic endpoint.
//!
//! Reports congestion and nearby incidents for a point. Never fails: provider
//! or configuration problems produce a degraded report with status 200.

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{decode_body, is_preflight, json_response, preflight_response};
use shared::traffic::{traffic_or_fallback, TrafficReport, TrafficRequest};
use shared::{load_config, Config};
use std::sync::Arc;
use tracing::{info, warn};
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

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if is_preflight(&event) {
        return preflight_response();
    }

    let report = match decode_body::<TrafficRequest>(event.body()) {
        Ok(request) => traffic_or_fallback(&state.config, &state.http_client, &request).await,
        Err(e) => {
            warn!(error = %e, "Unreadable traffic request");
            TrafficReport::degraded(format!("Invalid request body: {}", e))
        }
    };

    info!(
        congestion = report.congestion_level,
        incidents = report.incidents.len(),
        degraded = report.degraded,
        "Traffic report ready"
    );

    json_response(200, &report)
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

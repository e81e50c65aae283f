//! Validate Incident Lambda - Handles /validate-incident endpoint.
//!
//! Scores a citizen report for plausibility and flags likely repeats. Always
//! answers with a verdict; failures yield a degraded one with status 200.

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{decode_body, is_preflight, json_response, preflight_response};
use shared::validation::{degraded_outcome, validate_or_fallback, ValidateIncidentRequest};
use shared::{connect_store, load_config, ChatModel, GatewayClient, IncidentStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across requests.
struct AppState {
    model: Option<GatewayClient>,
    store: Option<Arc<dyn IncidentStore>>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = load_config().await?;
        let http_client = config.http_client()?;

        let model = GatewayClient::from_config(&config, http_client.clone())
            .map_err(|e| warn!(error = %e, "LLM gateway not configured"))
            .ok();
        let store = connect_store(&config, &http_client).await.unwrap_or_else(|e| {
            warn!(error = %e, "Incident store unavailable");
            None
        });

        Ok(Self { model, store })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if is_preflight(&event) {
        return preflight_response();
    }

    let outcome = match decode_body::<ValidateIncidentRequest>(event.body()) {
        Ok(request) => {
            let model = state.model.as_ref().map(|client| client as &dyn ChatModel);
            validate_or_fallback(model, state.store.as_deref(), &request.incident).await
        }
        Err(e) => {
            warn!(error = %e, "Unreadable validation request");
            degraded_outcome(format!("Invalid request body: {}", e))
        }
    };

    info!(
        confidence = outcome.validation.confidence,
        duplicates = outcome.potential_duplicates,
        degraded = outcome.degraded,
        "Incident validated"
    );

    json_response(200, &outcome)
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

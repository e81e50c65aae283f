//! Incidents Lambda - Handles /incidents endpoint.
//!
//! GET lists the most recent active reports, or with `days` and/or `type`
//! query parameters returns the history window with trend stats. POST
//! validates a new report, scores it and stores it.

use lambda_http::http::Method;
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use shared::http::{error_response, failure_response, is_preflight, json_response, preflight_response};
use shared::parse_body;
use shared::reports::{history_days, incident_history, list_incidents, submit_incident, IncidentHistory};
use shared::store::require_store;
use shared::{connect_store, load_config, ChatModel, GatewayClient, IncidentStore, IncidentSubmission};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn history(store: &dyn IncidentStore, event: &Request) -> shared::Result<Option<IncidentHistory>> {
    let params = event.query_string_parameters();
    let days = params.first("days");
    let event_type = params.first("type");
    if days.is_none() && event_type.is_none() {
        return Ok(None);
    }

    let days = history_days(days)?;
    incident_history(store, days, event_type, chrono::Utc::now())
        .await
        .map(Some)
}

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
            .map_err(|e| warn!(error = %e, "Reports will be stored without AI scoring"))
            .ok();
        let store = connect_store(&config, &http_client).await?;

        Ok(Self { model, store })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if is_preflight(&event) {
        return preflight_response();
    }

    let store: &dyn IncidentStore = match require_store(&state.store) {
        Ok(store) => store.as_ref(),
        Err(e) => {
            error!(error = %e, "No incident store");
            return failure_response(&e);
        }
    };

    match *event.method() {
        Method::GET => match history(store, &event).await {
            Ok(Some(history)) => json_response(200, &history),
            Ok(None) => match list_incidents(store).await {
                Ok(incidents) => {
                    info!(count = incidents.len(), "Listed incidents");
                    json_response(200, &incidents)
                }
                Err(e) => {
                    error!(error = %e, "Failed to list incidents");
                    failure_response(&e)
                }
            },
            Err(e) => {
                error!(error = %e, "Failed to load incident history");
                failure_response(&e)
            }
        },
        Method::POST => {
            let submission: IncidentSubmission = parse_body!(event.body());
            let model = state.model.as_ref().map(|client| client as &dyn ChatModel);

            match submit_incident(model, store, &submission).await {
                Ok(receipt) => json_response(201, &receipt),
                Err(e) => {
                    error!(error = %e, "Failed to submit incident");
                    failure_response(&e)
                }
            }
        }
        _ => error_response(405, "Method not allowed"),
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

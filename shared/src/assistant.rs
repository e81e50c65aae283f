//! Natural-language queries answered over live city data.
//!
//! Weather, traffic and recent incidents are gathered concurrently into a
//! context object, handed to the chat model as grounding, and the model's
//! free-text answer is scanned for a confidence percentage.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::config::{DEFAULT_LATITUDE, DEFAULT_LONGITUDE};
use crate::llm::ChatModel;
use crate::models::Incident;
use crate::store::IncidentStore;
use crate::traffic::{FlowSegment, TrafficSource};
use crate::weather::{CurrentConditions, WeatherLocation, WeatherSource};
use crate::{Error, Result};

/// Confidence reported when the answer states none.
pub const DEFAULT_CONFIDENCE: u8 = 75;

/// Number of recent incidents included as context.
pub const CONTEXT_INCIDENT_LIMIT: u32 = 10;

const NO_ANSWER: &str = "Unable to process query";

static CONFIDENCE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn confidence_pattern() -> &'static Regex {
    CONFIDENCE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,3})%\s*confidence").expect("confidence pattern is valid")
    })
}

/// AI query endpoint request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiQueryRequest {
    #[serde(default)]
    pub query: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub include_traffic: Option<bool>,
    pub include_weather: Option<bool>,
    pub include_incidents: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherContext {
    pub temp: f64,
    pub humidity: Option<f64>,
    pub description: Option<String>,
    pub wind_speed: Option<f64>,
}

impl From<&CurrentConditions> for WeatherContext {
    fn from(current: &CurrentConditions) -> Self {
        Self {
            temp: current.main.temp,
            humidity: current.main.humidity,
            description: current.weather.first().and_then(|c| c.description.clone()),
            wind_speed: current.wind.as_ref().map(|w| w.speed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficContext {
    pub current_speed: Number,
    pub free_flow_speed: Number,
    pub congestion: u8,
}

impl TrafficContext {
    /// `None` when the provider returned no flow segment at all.
    pub fn from_flow(flow: &FlowSegment) -> Option<Self> {
        if flow.current_speed.is_none() && flow.free_flow_speed.is_none() {
            return None;
        }
        let (current_speed, free_flow_speed) = flow.reported_speeds();
        Some(Self {
            current_speed,
            free_flow_speed,
            congestion: flow.congestion(),
        })
    }
}

/// Snapshot handed to the model as grounding for one query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    pub timestamp: DateTime<Utc>,
    pub location: GeoPoint,
    pub weather: Option<WeatherContext>,
    pub traffic: Option<TrafficContext>,
    pub recent_incidents: Vec<Incident>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub weather: Option<WeatherContext>,
    pub traffic: Option<TrafficContext>,
    pub incident_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiQueryResponse {
    pub response: String,
    pub confidence: u8,
    pub context: ContextSummary,
    pub timestamp: DateTime<Utc>,
}

/// Context providers; a `None` source is treated as unconfigured.
#[derive(Default, Clone, Copy)]
pub struct ContextSources<'a> {
    pub weather: Option<&'a dyn WeatherSource>,
    pub traffic: Option<&'a dyn TrafficSource>,
    pub incidents: Option<&'a dyn IncidentStore>,
}

/// Pull a "NN% confidence" figure out of free text, capped at 100.
pub fn extract_confidence(text: &str) -> u8 {
    confidence_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|value| value.min(100) as u8)
        .unwrap_or(DEFAULT_CONFIDENCE)
}

/// Gather every enabled source concurrently; each failure degrades on its own.
pub async fn gather_context(sources: &ContextSources<'_>, request: &AiQueryRequest) -> QueryContext {
    let location = GeoPoint {
        lat: request.lat.unwrap_or(DEFAULT_LATITUDE),
        lon: request.lon.unwrap_or(DEFAULT_LONGITUDE),
    };

    let weather_source = sources.weather.filter(|_| request.include_weather != Some(false));
    let traffic_source = sources.traffic.filter(|_| request.include_traffic != Some(false));
    let incident_source = sources.incidents.filter(|_| request.include_incidents != Some(false));

    let weather = async {
        let source = weather_source?;
        let point = WeatherLocation::Coordinates {
            lat: location.lat,
            lon: location.lon,
        };
        match source.current(&point).await {
            Ok(current) => Some(WeatherContext::from(&current)),
            Err(e) => {
                warn!(error = %e, "Weather context unavailable");
                None
            }
        }
    };

    let traffic = async {
        let source = traffic_source?;
        match source.flow(location.lat, location.lon).await {
            Ok(flow) => TrafficContext::from_flow(&flow),
            Err(e) => {
                warn!(error = %e, "Traffic context unavailable");
                None
            }
        }
    };

    let incidents = async {
        let Some(store) = incident_source else {
            return Vec::new();
        };
        store
            .recent_active(CONTEXT_INCIDENT_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Incident context unavailable");
                Vec::new()
            })
    };

    let (weather, traffic, recent_incidents) = tokio::join!(weather, traffic, incidents);

    QueryContext {
        timestamp: Utc::now(),
        location,
        weather,
        traffic,
        recent_incidents,
    }
}

/// System instruction embedding the context as pretty-printed JSON.
pub fn build_system_prompt(context: &QueryContext) -> Result<String> {
    let data = serde_json::to_string_pretty(context)?;

    Ok(format!(
        "You are Nexus AI, an intelligent urban analyst for Lagos, Nigeria. \
Analyze the user's query using the real-time data provided.

REAL-TIME DATA:
{data}

RESPONSE FORMAT:
Always structure your response with:
1. **Summary**: Direct answer to the query (1-2 sentences)
2. **Current Conditions**: Relevant real-time data
3. **Risk Assessment**: Severity level (low/medium/high) with confidence percentage
4. **Recommended Actions**: Specific, actionable steps
5. **Alternative Options**: If applicable (e.g., alternative routes)

Be specific about Lagos locations. Include confidence percentages for all predictions."
    ))
}

/// Answer a query: gather context, ask the model, derive confidence.
pub async fn answer_query(
    model: &dyn ChatModel,
    sources: &ContextSources<'_>,
    request: &AiQueryRequest,
) -> Result<AiQueryResponse> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(Error::Validation("query is required".to_string()));
    }

    let context = gather_context(sources, request).await;
    info!(
        has_weather = context.weather.is_some(),
        has_traffic = context.traffic.is_some(),
        incidents = context.recent_incidents.len(),
        "Context gathered"
    );

    let system_prompt = build_system_prompt(&context)?;
    let answer = model
        .complete(&system_prompt, query)
        .await
        .map_err(|e| match e {
            Error::Upstream(_) | Error::Http(_) => Error::Upstream("AI query failed".to_string()),
            other => other,
        })?;

    let response = if answer.trim().is_empty() {
        NO_ANSWER.to_string()
    } else {
        answer
    };
    let confidence = extract_confidence(&response);

    Ok(AiQueryResponse {
        confidence,
        response,
        context: ContextSummary {
            incident_count: context.recent_incidents.len(),
            weather: context.weather,
            traffic: context.traffic,
        },
        timestamp: Utc::now(),
    })
}

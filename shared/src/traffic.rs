//! Traffic flow and incident lookups against a TomTom-compatible provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_LATITUDE, DEFAULT_LONGITUDE};
use crate::weather::round_half_up;
use crate::{Config, Error, Result};

/// Half-width of the incident search box, in degrees.
pub const BBOX_HALF_WIDTH: f64 = 0.1;

/// Free-flow speed assumed when the provider reports none.
const DEFAULT_FREE_FLOW_SPEED: u32 = 50;

/// Values reported when the provider cannot be reached.
const FALLBACK_CONGESTION: u8 = 45;
const FALLBACK_CURRENT_SPEED: u32 = 35;
const FALLBACK_FREE_FLOW_SPEED: u32 = 60;

const INCIDENT_FIELDS: &str = "{incidents{type,geometry{type,coordinates},properties{id,iconCategory,magnitudeOfDelay,events{description,code},startTime,endTime,from,to,length,delay,roadNumbers}}}";

/// Traffic endpoint request body.
#[derive(Debug, Default, Deserialize)]
pub struct TrafficRequest {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Accepted for compatibility with the dashboard; not used.
    pub zoom: Option<f64>,
}

impl TrafficRequest {
    pub fn point(&self) -> (f64, f64) {
        (
            self.lat.unwrap_or(DEFAULT_LATITUDE),
            self.lon.unwrap_or(DEFAULT_LONGITUDE),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn around(lat: f64, lon: f64, half_width: f64) -> Self {
        Self {
            min_lon: lon - half_width,
            min_lat: lat - half_width,
            max_lon: lon + half_width,
            max_lat: lat + half_width,
        }
    }

    /// Provider ordering: `minLon,minLat,maxLon,maxLat`.
    pub fn to_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

// Provider payloads

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSegment {
    #[serde(default)]
    pub current_speed: Option<Number>,
    #[serde(default)]
    pub free_flow_speed: Option<Number>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowResponse {
    #[serde(default)]
    flow_segment_data: Option<FlowSegment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIncident {
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
    #[serde(default)]
    pub properties: Option<RawIncidentProperties>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGeometry {
    #[serde(default)]
    pub coordinates: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIncidentProperties {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub icon_category: Option<Value>,
    #[serde(default)]
    pub magnitude_of_delay: Option<Number>,
    #[serde(default)]
    pub events: Vec<RawIncidentEvent>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub delay: Option<Number>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIncidentEvent {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncidentsResponse {
    #[serde(default)]
    incidents: Vec<RawIncident>,
}

// Normalized output

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficIncident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub from: String,
    pub to: String,
    pub delay: Number,
    pub magnitude: Number,
    pub coordinates: Value,
}

/// Traffic endpoint response; `error` and `degraded` only appear on fallback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficReport {
    pub congestion_level: u8,
    pub current_speed: Number,
    pub free_flow_speed: Number,
    pub incidents: Vec<TrafficIncident>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl TrafficReport {
    /// Fallback report carrying the failure message.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            congestion_level: FALLBACK_CONGESTION,
            current_speed: Number::from(FALLBACK_CURRENT_SPEED),
            free_flow_speed: Number::from(FALLBACK_FREE_FLOW_SPEED),
            incidents: Vec::new(),
            timestamp: Utc::now(),
            error: Some(message.into()),
            degraded: true,
        }
    }
}

/// Percentage reduction of current speed relative to free-flow speed, in [0, 100].
pub fn congestion_level(current_speed: f64, free_flow_speed: f64) -> u8 {
    if !free_flow_speed.is_finite() || free_flow_speed <= 0.0 || !current_speed.is_finite() {
        return 0;
    }
    let level = round_half_up((1.0 - current_speed / free_flow_speed) * 100.0);
    level.clamp(0, 100) as u8
}

impl FlowSegment {
    /// Current and free-flow speed as the provider wrote them, gaps filled in.
    pub fn reported_speeds(&self) -> (Number, Number) {
        let current = self.current_speed.clone().unwrap_or_else(|| Number::from(0));
        let free_flow = self
            .free_flow_speed
            .clone()
            .filter(|s| s.as_f64().is_some_and(|v| v > 0.0))
            .unwrap_or_else(|| Number::from(DEFAULT_FREE_FLOW_SPEED));
        (current, free_flow)
    }

    /// [`FlowSegment::reported_speeds`] as floats, for arithmetic.
    pub fn speeds(&self) -> (f64, f64) {
        let (current, free_flow) = self.reported_speeds();
        (
            current.as_f64().unwrap_or(0.0),
            free_flow.as_f64().unwrap_or(f64::from(DEFAULT_FREE_FLOW_SPEED)),
        )
    }

    pub fn congestion(&self) -> u8 {
        let (current, free_flow) = self.speeds();
        congestion_level(current, free_flow)
    }
}

fn value_as_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Give a provider incident the fixed shape the dashboard expects.
pub fn normalize_incident(raw: &RawIncident) -> TrafficIncident {
    let props = raw.properties.clone().unwrap_or_default();

    TrafficIncident {
        id: props
            .id
            .as_ref()
            .and_then(value_as_label)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        kind: props
            .icon_category
            .as_ref()
            .and_then(value_as_label)
            .unwrap_or_else(|| "unknown".to_string()),
        description: props
            .events
            .first()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| "Traffic incident".to_string()),
        from: props.from.unwrap_or_else(|| "Unknown location".to_string()),
        to: props.to.unwrap_or_else(|| "Unknown destination".to_string()),
        delay: props.delay.unwrap_or_else(|| Number::from(0)),
        magnitude: props.magnitude_of_delay.unwrap_or_else(|| Number::from(0)),
        coordinates: raw
            .geometry
            .as_ref()
            .and_then(|g| g.coordinates.clone())
            .unwrap_or_else(|| Value::Array(Vec::new())),
    }
}

/// Source of raw traffic data.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    async fn flow(&self, lat: f64, lon: f64) -> Result<FlowSegment>;

    async fn incidents(&self, bbox: BoundingBox) -> Result<Vec<RawIncident>>;
}

/// HTTP client for the traffic provider.
pub struct TomTomClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TomTomClient {
    pub fn new(http_client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Build a client from configuration, failing if the traffic key is absent.
    pub fn from_config(config: &Config, http_client: reqwest::Client) -> Result<Self> {
        let api_key = config.require_traffic_key()?;
        Ok(Self::new(http_client, &config.traffic_base_url, api_key))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http_client
            .get(format!("{}/{}", self.base_url, path))
            .query(params)
            .query(&[("key", &self.api_key)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_text, path = %path, "Traffic provider error");
            return Err(Error::Upstream(format!("Traffic provider returned {}", status)));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TrafficSource for TomTomClient {
    async fn flow(&self, lat: f64, lon: f64) -> Result<FlowSegment> {
        let response: FlowResponse = self
            .get_json(
                "4/flowSegmentData/absolute/10/json",
                &[("point", format!("{},{}", lat, lon))],
            )
            .await?;
        Ok(response.flow_segment_data.unwrap_or_default())
    }

    async fn incidents(&self, bbox: BoundingBox) -> Result<Vec<RawIncident>> {
        let response: IncidentsResponse = self
            .get_json(
                "5/incidentDetails",
                &[
                    ("bbox", bbox.to_param()),
                    ("fields", INCIDENT_FIELDS.to_string()),
                ],
            )
            .await?;
        Ok(response.incidents)
    }
}

/// Fetch flow and incidents around a point.
///
/// A failing flow call fails the lookup; a failing incident call only
/// empties the incident list.
pub async fn fetch_traffic(source: &dyn TrafficSource, lat: f64, lon: f64) -> Result<TrafficReport> {
    let bbox = BoundingBox::around(lat, lon, BBOX_HALF_WIDTH);
    info!(lat, lon, bbox = %bbox.to_param(), "Fetching traffic");

    let (flow, incidents) = tokio::join!(source.flow(lat, lon), source.incidents(bbox));

    let flow = flow?;
    let incidents = incidents.unwrap_or_else(|e| {
        warn!(error = %e, "Traffic incidents unavailable");
        Vec::new()
    });

    let (current_speed, free_flow_speed) = flow.reported_speeds();

    Ok(TrafficReport {
        congestion_level: flow.congestion(),
        current_speed,
        free_flow_speed,
        incidents: incidents.iter().map(normalize_incident).collect(),
        timestamp: Utc::now(),
        error: None,
        degraded: false,
    })
}

/// Traffic lookup that never fails: errors become a degraded report.
pub async fn traffic_or_fallback(
    config: &Config,
    http_client: &reqwest::Client,
    request: &TrafficRequest,
) -> TrafficReport {
    let (lat, lon) = request.point();
    let result = match TomTomClient::from_config(config, http_client.clone()) {
        Ok(client) => fetch_traffic(&client, lat, lon).await,
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        warn!(error = %e, "Traffic lookup degraded");
        TrafficReport::degraded(e.client_message())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTraffic {
        flow: Result<FlowSegment>,
        incidents: Vec<RawIncident>,
    }

    #[async_trait]
    impl TrafficSource for StubTraffic {
        async fn flow(&self, _lat: f64, _lon: f64) -> Result<FlowSegment> {
            match &self.flow {
                Ok(flow) => Ok(flow.clone()),
                Err(e) => Err(Error::Upstream(e.to_string())),
            }
        }

        async fn incidents(&self, _bbox: BoundingBox) -> Result<Vec<RawIncident>> {
            Ok(self.incidents.clone())
        }
    }

    fn flow(current: u32, free_flow: u32) -> FlowSegment {
        FlowSegment {
            current_speed: Some(Number::from(current)),
            free_flow_speed: Some(Number::from(free_flow)),
        }
    }

    #[test]
    fn test_congestion_boundaries() {
        assert_eq!(congestion_level(40.0, 40.0), 0);
        assert_eq!(congestion_level(0.0, 60.0), 100);
        assert_eq!(congestion_level(30.0, 60.0), 50);
    }

    #[test]
    fn test_congestion_is_clamped() {
        for current in [0.0, 1.0, 17.5, 49.9, 50.0, 75.0, 500.0] {
            for free_flow in [0.5, 10.0, 50.0, 120.0] {
                let level = congestion_level(current, free_flow);
                assert!(level <= 100, "{} / {} gave {}", current, free_flow, level);
            }
        }
        assert_eq!(congestion_level(90.0, 60.0), 0);
        assert_eq!(congestion_level(10.0, 0.0), 0);
        assert_eq!(congestion_level(f64::NAN, 50.0), 0);
    }

    #[test]
    fn test_flow_defaults() {
        let empty = FlowSegment::default();
        assert_eq!(empty.speeds(), (0.0, 50.0));
        assert_eq!(empty.congestion(), 100);
        assert_eq!(flow(20, 0).speeds(), (20.0, 50.0));
    }

    #[test]
    fn test_bounding_box() {
        let bbox = BoundingBox::around(6.5, 3.4, BBOX_HALF_WIDTH);
        assert!((bbox.min_lat - 6.4).abs() < 1e-9);
        assert!((bbox.max_lon - 3.5).abs() < 1e-9);
        assert!(bbox.to_param().starts_with("3.3"));
    }

    #[test]
    fn test_normalize_incident_with_defaults() {
        let incident = normalize_incident(&RawIncident::default());
        assert_eq!(incident.kind, "unknown");
        assert_eq!(incident.description, "Traffic incident");
        assert_eq!(incident.from, "Unknown location");
        assert_eq!(incident.to, "Unknown destination");
        assert_eq!(incident.delay, Number::from(0));
        assert_eq!(incident.coordinates, Value::Array(Vec::new()));
        assert!(Uuid::parse_str(&incident.id).is_ok());
    }

    #[test]
    fn test_normalize_incident_from_provider() {
        let raw: RawIncident = serde_json::from_value(serde_json::json!({
            "type": "Feature",
            "geometry": {"type": "LineString", "coordinates": [[3.37, 6.52], [3.38, 6.53]]},
            "properties": {
                "id": "abc123",
                "iconCategory": 6,
                "magnitudeOfDelay": 3,
                "events": [{"description": "Stationary traffic", "code": 101}],
                "from": "Ikorodu Road",
                "to": "Jibowu",
                "delay": 420
            }
        }))
        .unwrap();

        let incident = normalize_incident(&raw);
        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["delay"].to_string(), "420");
        assert_eq!(incident.id, "abc123");
        assert_eq!(incident.kind, "6");
        assert_eq!(incident.description, "Stationary traffic");
        assert_eq!(incident.delay, Number::from(420));
        assert_eq!(incident.magnitude, Number::from(3));
        assert_eq!(incident.coordinates[0][1], 6.52);
    }

    #[tokio::test]
    async fn test_fetch_traffic_builds_report() {
        let source = StubTraffic {
            flow: Ok(flow(15, 60)),
            incidents: vec![RawIncident::default()],
        };
        let report = fetch_traffic(&source, 6.5244, 3.3792).await.unwrap();
        assert_eq!(report.congestion_level, 75);
        assert_eq!(report.incidents.len(), 1);
        assert!(!report.degraded);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("degraded").is_none());
        assert_eq!(json["congestionLevel"], 75);
        assert_eq!(json["currentSpeed"].to_string(), "15");
        assert_eq!(json["freeFlowSpeed"].to_string(), "60");
    }

    #[tokio::test]
    async fn test_fractional_provider_speeds_pass_through() {
        let segment: FlowSegment =
            serde_json::from_str(r#"{"currentSpeed": 22.5, "freeFlowSpeed": 45}"#).unwrap();
        let source = StubTraffic {
            flow: Ok(segment),
            incidents: Vec::new(),
        };
        let json = serde_json::to_value(fetch_traffic(&source, 6.5, 3.4).await.unwrap()).unwrap();
        assert_eq!(json["currentSpeed"].to_string(), "22.5");
        assert_eq!(json["freeFlowSpeed"].to_string(), "45");
        assert_eq!(json["congestionLevel"], 50);
    }

    #[tokio::test]
    async fn test_missing_key_degrades() {
        let report =
            traffic_or_fallback(&Config::default(), &reqwest::Client::new(), &TrafficRequest::default())
                .await;
        assert!(report.degraded);
        assert_eq!(report.congestion_level, 45);
        assert!(report.incidents.is_empty());
        assert!(report.error.unwrap().contains("TomTom API key not configured"));
    }

    #[test]
    fn test_degraded_report_shape() {
        let json = serde_json::to_value(TrafficReport::degraded("boom")).unwrap();
        assert_eq!(json["error"], "boom");
        assert_eq!(json["degraded"], true);
        assert_eq!(json["congestionLevel"], 45);
        assert_eq!(json["currentSpeed"].to_string(), "35");
        assert_eq!(json["freeFlowSpeed"].to_string(), "60");
        assert_eq!(json["incidents"], serde_json::json!([]));
    }
}

//! Duplicate detection and model-scored plausibility for submitted incidents.

use chrono::{DateTime, Duration, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::ChatModel;
use crate::models::{Incident, IncidentCandidate, Severity};
use crate::store::IncidentStore;
use crate::{Error, Result};

/// How far back same-type incidents are considered for duplication.
pub const DUPLICATE_WINDOW_MINUTES: i64 = 30;

/// Coordinate delta (degrees, per axis) under which two reports are the same place.
///
/// Roughly 1 km near the equator; not a geodesic distance.
pub const DUPLICATE_DEGREE_DELTA: f64 = 0.01;

const PARSE_FALLBACK_CONFIDENCE: u8 = 70;
const UNAVAILABLE_CONFIDENCE: u8 = 50;

const USER_INSTRUCTION: &str = "Analyze this incident and respond with JSON only.";

/// Validation endpoint request body.
#[derive(Debug, Deserialize)]
pub struct ValidateIncidentRequest {
    pub incident: IncidentCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub confidence: u8,
    pub impact: Severity,
    pub analysis: String,
    pub actions: Vec<String>,
    #[serde(rename = "isDuplicate")]
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concerns: Option<Vec<String>>,
}

impl ValidationVerdict {
    /// Verdict used when the model answered without any JSON object.
    fn pending(candidate: &IncidentCandidate, duplicate_count: usize) -> Self {
        Self {
            confidence: PARSE_FALLBACK_CONFIDENCE,
            impact: candidate.severity,
            analysis: "Automated validation pending".to_string(),
            actions: vec!["Review incident details".to_string()],
            is_duplicate: duplicate_count > 0,
            concerns: None,
        }
    }

    /// Verdict used when the model's JSON could not be decoded.
    fn unparsed(candidate: &IncidentCandidate, duplicate_count: usize, raw: &str) -> Self {
        Self {
            confidence: PARSE_FALLBACK_CONFIDENCE,
            impact: candidate.severity,
            analysis: raw.to_string(),
            actions: vec!["Manual review recommended".to_string()],
            is_duplicate: duplicate_count > 0,
            concerns: None,
        }
    }

    /// Verdict used when validation could not run at all.
    pub fn unavailable() -> Self {
        Self {
            confidence: UNAVAILABLE_CONFIDENCE,
            impact: Severity::Medium,
            analysis: "Validation service unavailable".to_string(),
            actions: vec!["Manual review required".to_string()],
            is_duplicate: false,
            concerns: None,
        }
    }
}

/// Validation endpoint response; `error` and `degraded` only appear on fallback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub validation: ValidationVerdict,
    pub potential_duplicates: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

/// Verdict as the model writes it; tolerant of casing, nulls and missing fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelVerdict {
    #[serde(deserialize_with = "number_or_numeric_string")]
    confidence: f64,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    actions: Option<Vec<String>>,
    #[serde(default)]
    is_duplicate: Option<bool>,
    #[serde(default)]
    concerns: Option<Vec<String>>,
}

/// Accept `85`, `85.5`, `"85"` or `"85%"`.
fn number_or_numeric_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("confidence is not representable")),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim_end()
            .parse()
            .map_err(de::Error::custom),
        other => Err(de::Error::custom(format!(
            "confidence must be a number, got {}",
            other
        ))),
    }
}

fn parse_impact(value: Option<&str>, fallback: Severity) -> Severity {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("low") => Severity::Low,
        Some("medium") => Severity::Medium,
        Some("high") => Severity::High,
        _ => fallback,
    }
}

/// Whether `existing` looks like a repeat report of `candidate`.
///
/// With coordinates on both sides this is a per-axis delta check; otherwise
/// the existing address must contain the candidate's address up to its first
/// comma, case-insensitively.
pub fn is_potential_duplicate(candidate: &IncidentCandidate, existing: &Incident) -> bool {
    match (candidate.coordinates(), existing.coordinates()) {
        (Some((lat, lon)), Some((other_lat, other_lon))) => {
            (lat - other_lat).abs() < DUPLICATE_DEGREE_DELTA
                && (lon - other_lon).abs() < DUPLICATE_DEGREE_DELTA
        }
        _ => {
            let prefix = candidate
                .location_address
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            existing.location_address.to_lowercase().contains(&prefix)
        }
    }
}

/// Incidents among `recent` that look like repeats of `candidate`.
pub fn find_duplicates<'a>(candidate: &IncidentCandidate, recent: &'a [Incident]) -> Vec<&'a Incident> {
    recent
        .iter()
        .filter(|existing| is_potential_duplicate(candidate, existing))
        .collect()
}

/// System prompt asking the model for a strict JSON verdict.
pub fn build_validation_prompt(candidate: &IncidentCandidate, duplicate_count: usize) -> String {
    let description = candidate
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or("No description provided");

    let duplicate_note = if duplicate_count > 0 {
        format!(
            "\nNote: {} similar incidents reported in the last {} minutes in this area.",
            duplicate_count, DUPLICATE_WINDOW_MINUTES
        )
    } else {
        String::new()
    };

    format!(
        "You are an incident validation AI for Lagos, Nigeria. Analyze this incident report and provide:
1. A confidence score (0-100) for validity
2. An impact assessment
3. Recommended actions for authorities
4. Any concerns about the report

Incident Details:
- Type: {event_type}
- Severity: {severity}
- Location: {location}
- Description: {description}
{duplicate_note}

Respond in JSON format:
{{
  \"confidence\": number,
  \"impact\": \"low\" | \"medium\" | \"high\",
  \"analysis\": \"string\",
  \"actions\": [\"string\"],
  \"isDuplicate\": boolean,
  \"concerns\": [\"string\"] or null
}}",
        event_type = candidate.event_type,
        severity = candidate.severity,
        location = candidate.location_address,
    )
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Turn the model's answer into a verdict, synthesizing one if it is unusable.
pub fn parse_verdict(content: &str, candidate: &IncidentCandidate, duplicate_count: usize) -> ValidationVerdict {
    let Some(json) = extract_json_object(content) else {
        warn!("Model answer contained no JSON verdict");
        return ValidationVerdict::pending(candidate, duplicate_count);
    };

    match serde_json::from_str::<ModelVerdict>(json) {
        Ok(parsed) => ValidationVerdict {
            confidence: parsed.confidence.clamp(0.0, 100.0).round() as u8,
            impact: parse_impact(parsed.impact.as_deref(), candidate.severity),
            analysis: parsed.analysis.unwrap_or_default(),
            actions: parsed.actions.unwrap_or_default(),
            is_duplicate: parsed.is_duplicate.unwrap_or(duplicate_count > 0),
            concerns: parsed.concerns,
        },
        Err(e) => {
            warn!(error = %e, "Model verdict was not valid JSON");
            ValidationVerdict::unparsed(candidate, duplicate_count, content)
        }
    }
}

/// Run duplicate detection and model scoring for one candidate.
///
/// Returns the verdict and the number of potential duplicates found.
pub async fn validate_incident(
    model: &dyn ChatModel,
    store: &dyn IncidentStore,
    candidate: &IncidentCandidate,
    now: DateTime<Utc>,
) -> Result<(ValidationVerdict, usize)> {
    let since = now - Duration::minutes(DUPLICATE_WINDOW_MINUTES);
    let recent = store
        .active_of_type_since(&candidate.event_type, since)
        .await?;
    let duplicate_count = find_duplicates(candidate, &recent).len();

    info!(
        event_type = %candidate.event_type,
        recent = recent.len(),
        duplicates = duplicate_count,
        "Checked for duplicate reports"
    );

    let prompt = build_validation_prompt(candidate, duplicate_count);
    let content = model.complete(&prompt, USER_INSTRUCTION).await.map_err(|e| match e {
        Error::Upstream(_) | Error::Http(_) => Error::Upstream("AI validation failed".to_string()),
        other => other,
    })?;

    Ok((parse_verdict(&content, candidate, duplicate_count), duplicate_count))
}

/// Validation that never fails: any error yields the "unavailable" verdict.
pub async fn validate_or_fallback(
    model: Option<&dyn ChatModel>,
    store: Option<&dyn IncidentStore>,
    candidate: &IncidentCandidate,
) -> ValidationOutcome {
    let result = async {
        let model = model
            .ok_or_else(|| Error::Config("LLM_GATEWAY_API_KEY not configured".to_string()))?;
        let store =
            store.ok_or_else(|| Error::Config("Incident storage not configured".to_string()))?;
        validate_incident(model, store, candidate, Utc::now()).await
    }
    .await;

    match result {
        Ok((validation, potential_duplicates)) => ValidationOutcome {
            validation,
            potential_duplicates,
            timestamp: Utc::now(),
            error: None,
            degraded: false,
        },
        Err(e) => {
            warn!(error = %e, "Incident validation degraded");
            degraded_outcome(e.client_message())
        }
    }
}

/// Fallback outcome carrying the failure message.
pub fn degraded_outcome(message: impl Into<String>) -> ValidationOutcome {
    ValidationOutcome {
        validation: ValidationVerdict::unavailable(),
        potential_duplicates: 0,
        timestamp: Utc::now(),
        error: Some(message.into()),
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, NewIncident};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn candidate(address: &str, coords: Option<(f64, f64)>) -> IncidentCandidate {
        IncidentCandidate {
            event_type: "flood".to_string(),
            severity: Severity::High,
            location_address: address.to_string(),
            description: Some("Water up to the knees".to_string()),
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
        }
    }

    fn existing(address: &str, coords: Option<(f64, f64)>) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            user_id: None,
            event_type: "flood".to_string(),
            severity: Severity::Medium,
            severity_score: Some(50),
            title: "Flooding".to_string(),
            description: None,
            location_address: address.to_string(),
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
            media_urls: None,
            impact_notes: None,
            status: Some(IncidentStatus::Active),
            verified: Some(false),
            ai_confidence: None,
            ai_analysis: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct StubModel {
        answer: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubModel {
        fn answering(answer: &str) -> Self {
            Self {
                answer: Ok(answer.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Err("LLM gateway returned 503".to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for StubModel {
        async fn complete(&self, system_prompt: &str, _user_message: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(system_prompt.to_string());
            self.answer.clone().map_err(Error::Upstream)
        }
    }

    struct StubStore {
        recent: Vec<Incident>,
        queries: Mutex<Vec<(String, DateTime<Utc>)>>,
    }

    impl StubStore {
        fn with(recent: Vec<Incident>) -> Self {
            Self {
                recent,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IncidentStore for StubStore {
        async fn recent_active(&self, _limit: u32) -> Result<Vec<Incident>> {
            Ok(self.recent.clone())
        }

        async fn active_of_type_since(
            &self,
            event_type: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<Incident>> {
            self.queries
                .lock()
                .unwrap()
                .push((event_type.to_string(), since));
            Ok(self.recent.clone())
        }

        async fn created_since(
            &self,
            _since: DateTime<Utc>,
            _event_type: Option<&str>,
        ) -> Result<Vec<Incident>> {
            Ok(self.recent.clone())
        }

        async fn insert(&self, _incident: &NewIncident) -> Result<Incident> {
            Err(Error::Internal("read-only".to_string()))
        }
    }

    #[test]
    fn test_nearby_coordinates_are_duplicates() {
        let new = candidate("Lekki, Lagos", Some((6.5000, 3.5000)));
        assert!(is_potential_duplicate(&new, &existing("Elsewhere", Some((6.5005, 3.5005)))));
        assert!(!is_potential_duplicate(&new, &existing("Lekki", Some((6.6000, 3.6000)))));
    }

    #[test]
    fn test_address_prefix_fallback() {
        let new = candidate("Lekki, Lagos", None);
        assert!(is_potential_duplicate(&new, &existing("Lekki-Epe Expressway", None)));

        let ikeja = candidate("Ikeja", None);
        assert!(!is_potential_duplicate(&ikeja, &existing("Lekki", None)));
    }

    #[test]
    fn test_address_fallback_when_one_side_lacks_coordinates() {
        let new = candidate("Yaba, Lagos", Some((6.51, 3.37)));
        assert!(is_potential_duplicate(&new, &existing("YABA bus stop", None)));
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Sure! ```json\n{\"a\": {\"b\": 1}}\n``` done"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_parse_verdict_reads_model_json() {
        let content = r#"Here you go: {"confidence": 88.4, "impact": "High", "analysis": "Consistent with rainfall", "actions": ["Dispatch LASEMA"], "isDuplicate": false, "concerns": null}"#;
        let verdict = parse_verdict(content, &candidate("Lekki", None), 2);
        assert_eq!(verdict.confidence, 88);
        assert_eq!(verdict.impact, Severity::High);
        assert_eq!(verdict.actions, vec!["Dispatch LASEMA".to_string()]);
        assert!(!verdict.is_duplicate);
        assert!(verdict.concerns.is_none());
    }

    #[test]
    fn test_parse_verdict_accepts_null_actions() {
        let content = r#"{"confidence": 92, "impact": "low", "analysis": "Minor", "actions": null, "isDuplicate": null, "concerns": null}"#;
        let verdict = parse_verdict(content, &candidate("Lekki", None), 1);
        assert_eq!(verdict.confidence, 92);
        assert_eq!(verdict.analysis, "Minor");
        assert!(verdict.actions.is_empty());
        assert!(verdict.is_duplicate);
    }

    #[test]
    fn test_parse_verdict_accepts_numeric_string_confidence() {
        let new = candidate("Lekki", None);
        let content = r#"{"confidence": "85", "impact": "medium", "analysis": "Likely", "actions": ["Monitor"], "isDuplicate": false}"#;
        let verdict = parse_verdict(content, &new, 0);
        assert_eq!(verdict.confidence, 85);
        assert_eq!(verdict.analysis, "Likely");

        let percent = parse_verdict(r#"{"confidence": "64%"}"#, &new, 0);
        assert_eq!(percent.confidence, 64);

        let wordy = parse_verdict(r#"{"confidence": "high"}"#, &new, 0);
        assert_eq!(wordy.confidence, 70);
        assert_eq!(wordy.actions, vec!["Manual review recommended".to_string()]);
    }

    #[test]
    fn test_parse_verdict_fallbacks() {
        let new = candidate("Lekki", None);

        let pending = parse_verdict("I think it is real.", &new, 1);
        assert_eq!(pending.confidence, 70);
        assert_eq!(pending.impact, Severity::High);
        assert!(pending.is_duplicate);
        assert_eq!(pending.actions, vec!["Review incident details".to_string()]);

        let broken = parse_verdict("{confidence: high}", &new, 0);
        assert_eq!(broken.confidence, 70);
        assert_eq!(broken.analysis, "{confidence: high}");
        assert!(!broken.is_duplicate);
        assert_eq!(broken.actions, vec!["Manual review recommended".to_string()]);
    }

    #[test]
    fn test_prompt_mentions_duplicates_only_when_present() {
        let new = IncidentCandidate {
            description: None,
            ..candidate("Lekki, Lagos", None)
        };
        let quiet = build_validation_prompt(&new, 0);
        assert!(quiet.contains("- Description: No description provided"));
        assert!(quiet.contains("- Severity: high"));
        assert!(!quiet.contains("similar incidents"));

        let noisy = build_validation_prompt(&new, 3);
        assert!(noisy.contains("Note: 3 similar incidents reported in the last 30 minutes"));
    }

    #[tokio::test]
    async fn test_validate_counts_duplicates_in_window() {
        let store = StubStore::with(vec![
            existing("Lekki Phase 1", None),
            existing("Surulere", None),
        ]);
        let model = StubModel::answering(r#"{"confidence": 91, "impact": "medium", "analysis": "ok", "actions": [], "isDuplicate": true}"#);
        let now = Utc::now();

        let (verdict, duplicates) =
            validate_incident(&model, &store, &candidate("Lekki, Lagos", None), now)
                .await
                .unwrap();

        assert_eq!(duplicates, 1);
        assert_eq!(verdict.confidence, 91);
        assert!(verdict.is_duplicate);

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries[0].0, "flood");
        assert_eq!(now - queries[0].1, Duration::minutes(30));
        assert!(model.prompts.lock().unwrap()[0].contains("Note: 1 similar incidents"));
    }

    #[tokio::test]
    async fn test_model_failure_yields_unavailable_verdict() {
        let store = StubStore::with(Vec::new());
        let model = StubModel::failing();

        let outcome =
            validate_or_fallback(Some(&model), Some(&store), &candidate("Lekki", None)).await;

        assert!(outcome.degraded);
        assert_eq!(outcome.validation.confidence, 50);
        assert_eq!(outcome.validation.analysis, "Validation service unavailable");
        assert_eq!(outcome.error.as_deref(), Some("AI validation failed"));
    }

    #[tokio::test]
    async fn test_missing_configuration_yields_verdict() {
        let outcome = validate_or_fallback(None, None, &candidate("Lekki", None)).await;

        assert!(outcome.degraded);
        assert_eq!(outcome.validation.confidence, 50);
        assert_eq!(outcome.validation.impact, Severity::Medium);
        assert!(outcome.error.unwrap().contains("LLM_GATEWAY_API_KEY"));
    }

    #[tokio::test]
    async fn test_unparseable_answer_keeps_success_shape() {
        let store = StubStore::with(Vec::new());
        let model = StubModel::answering("Looks legitimate to me.");

        let outcome =
            validate_or_fallback(Some(&model), Some(&store), &candidate("Lekki", None)).await;

        assert!(!outcome.degraded);
        assert_eq!(outcome.validation.confidence, 70);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["validation"]["isDuplicate"], false);
        assert_eq!(json["potentialDuplicates"], 0);
        assert!(json.get("error").is_none());
        assert!(json["validation"].get("concerns").is_none());
    }
}

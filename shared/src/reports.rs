//! Citizen incident reports: listing, history and validated submission.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;
use validator::Validate;

use crate::llm::ChatModel;
use crate::models::{Incident, IncidentSubmission, NewIncident, Severity};
use crate::store::IncidentStore;
use crate::validation::{validate_or_fallback, ValidationOutcome};
use crate::weather::round_half_up;
use crate::{Error, Result};

/// Number of active incidents returned to the dashboard.
pub const LIST_LIMIT: u32 = 50;

pub const DEFAULT_HISTORY_DAYS: u32 = 7;
pub const MAX_HISTORY_DAYS: u32 = 90;

/// Aggregates shown on the history and trends view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    pub high_severity: usize,
    /// Rounded mean over scored incidents; 0 when none are scored.
    pub avg_confidence: u8,
    /// Incident count per UTC day (`YYYY-MM-DD`).
    pub by_date: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct IncidentHistory {
    pub incidents: Vec<Incident>,
    pub stats: HistoryStats,
}

#[derive(Debug, Serialize)]
pub struct SubmissionReceipt {
    pub incident: Incident,
    pub validation: ValidationOutcome,
}

pub async fn list_incidents(store: &dyn IncidentStore) -> Result<Vec<Incident>> {
    store.recent_active(LIST_LIMIT).await
}

/// Parse the `days` query parameter, defaulting to a week.
pub fn history_days(raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(DEFAULT_HISTORY_DAYS);
    };
    match raw.parse::<u32>() {
        Ok(days) if (1..=MAX_HISTORY_DAYS).contains(&days) => Ok(days),
        _ => Err(Error::Validation(format!(
            "days must be a whole number between 1 and {}",
            MAX_HISTORY_DAYS
        ))),
    }
}

/// Totals, high-severity count, mean AI confidence and per-day counts.
///
/// A missing or zero confidence counts as unscored.
pub fn history_stats(incidents: &[Incident]) -> HistoryStats {
    let scored: Vec<i32> = incidents
        .iter()
        .filter_map(|incident| incident.ai_confidence)
        .filter(|confidence| *confidence != 0)
        .collect();
    let avg_confidence = if scored.is_empty() {
        0
    } else {
        let sum: i64 = scored.iter().map(|c| i64::from(*c)).sum();
        round_half_up(sum as f64 / scored.len() as f64).clamp(0, 100) as u8
    };

    let mut by_date = BTreeMap::new();
    for incident in incidents {
        *by_date
            .entry(incident.created_at.format("%Y-%m-%d").to_string())
            .or_insert(0) += 1;
    }

    HistoryStats {
        total: incidents.len(),
        high_severity: incidents
            .iter()
            .filter(|incident| incident.severity == Severity::High)
            .count(),
        avg_confidence,
        by_date,
    }
}

/// Incidents of any status from the last `days` days, newest first, with stats.
///
/// An `event_type` of `all` (or blank) means no type filter.
pub async fn incident_history(
    store: &dyn IncidentStore,
    days: u32,
    event_type: Option<&str>,
    now: DateTime<Utc>,
) -> Result<IncidentHistory> {
    let event_type = event_type
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("all"));
    let since = now - Duration::days(i64::from(days));

    let incidents = store.created_since(since, event_type).await?;
    let stats = history_stats(&incidents);
    info!(
        days,
        event_type = event_type.unwrap_or("all"),
        total = stats.total,
        "Loaded incident history"
    );

    Ok(IncidentHistory { incidents, stats })
}

/// Validate a submission, score it, and persist it with the model's verdict.
///
/// Scoring never blocks the report: a degraded verdict is stored as is.
pub async fn submit_incident(
    model: Option<&dyn ChatModel>,
    store: &dyn IncidentStore,
    submission: &IncidentSubmission,
) -> Result<SubmissionReceipt> {
    submission.validate()?;

    let validation = validate_or_fallback(model, Some(store), &submission.candidate()).await;

    let mut record = NewIncident::from_submission(submission);
    record.ai_confidence = Some(i32::from(validation.validation.confidence));
    record.ai_analysis = Some(validation.validation.analysis.clone());

    let incident = store.insert(&record).await?;
    info!(
        incident_id = %incident.id,
        event_type = %incident.event_type,
        confidence = validation.validation.confidence,
        degraded = validation.degraded,
        "Incident reported"
    );

    Ok(SubmissionReceipt { incident, validation })
}

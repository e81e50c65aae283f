//! Shared data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Severity (and impact) level of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Map a 0-100 severity score onto a level.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=33 => Severity::Low,
            34..=66 => Severity::Medium,
            _ => Severity::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Active,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Active => "active",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

/// An incident row as persisted by the storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub severity_score: Option<i32>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location_address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub media_urls: Option<Vec<String>>,
    #[serde(default)]
    pub impact_notes: Option<String>,
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub ai_confidence: Option<i32>,
    #[serde(default)]
    pub ai_analysis: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// The incident-shaped body sent for validation before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCandidate {
    pub event_type: String,
    pub severity: Severity,
    pub location_address: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl IncidentCandidate {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// A citizen report submitted from the dashboard.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IncidentSubmission {
    #[validate(length(min = 1, message = "event_type is required"))]
    pub event_type: String,
    #[validate(range(max = 100, message = "severity_score must be between 0 and 100"))]
    pub severity_score: u8,
    #[validate(custom(function = "not_blank", message = "title is required"))]
    pub title: String,
    #[validate(custom(function = "not_blank", message = "location_address is required"))]
    pub location_address: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub impact_notes: Option<String>,
    #[serde(default)]
    #[validate(length(max = 5, message = "at most 5 media files are allowed"))]
    pub media_urls: Vec<String>,
}

fn not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(validator::ValidationError::new("blank"));
    }
    Ok(())
}

impl IncidentSubmission {
    pub fn severity(&self) -> Severity {
        Severity::from_score(self.severity_score)
    }

    pub fn candidate(&self) -> IncidentCandidate {
        IncidentCandidate {
            event_type: self.event_type.clone(),
            severity: self.severity(),
            location_address: self.location_address.trim().to_string(),
            description: trimmed(&self.description),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Fields written when a new incident is stored.
#[derive(Debug, Clone, Serialize)]
pub struct NewIncident {
    pub event_type: String,
    pub severity: Severity,
    pub severity_score: i32,
    pub title: String,
    pub description: Option<String>,
    pub location_address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub impact_notes: Option<String>,
    pub media_urls: Vec<String>,
    pub status: IncidentStatus,
    pub verified: bool,
    pub ai_confidence: Option<i32>,
    pub ai_analysis: Option<String>,
}

impl NewIncident {
    pub fn from_submission(submission: &IncidentSubmission) -> Self {
        Self {
            event_type: submission.event_type.clone(),
            severity: submission.severity(),
            severity_score: i32::from(submission.severity_score),
            title: submission.title.trim().to_string(),
            description: trimmed(&submission.description),
            location_address: submission.location_address.trim().to_string(),
            latitude: submission.latitude,
            longitude: submission.longitude,
            impact_notes: trimmed(&submission.impact_notes),
            media_urls: submission.media_urls.clone(),
            status: IncidentStatus::Active,
            verified: false,
            ai_confidence: None,
            ai_analysis: None,
        }
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

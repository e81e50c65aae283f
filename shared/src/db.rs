//! Direct Postgres access to the incidents table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::models::{Incident, IncidentStatus, NewIncident, Severity};
use crate::store::IncidentStore;
use crate::{Error, Result};

const INCIDENT_COLUMNS: &str = r#"
    id, user_id, event_type::text AS event_type, severity::text AS severity,
    severity_score::int4 AS severity_score,
    title, description, location_address,
    latitude::float8 AS latitude, longitude::float8 AS longitude,
    media_urls, impact_notes, status::text AS status, verified,
    ai_confidence::int4 AS ai_confidence, ai_analysis, created_at, updated_at
"#;

/// Create a database connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct IncidentRow {
    id: Uuid,
    user_id: Option<Uuid>,
    event_type: String,
    severity: String,
    severity_score: Option<i32>,
    title: String,
    description: Option<String>,
    location_address: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    media_urls: Option<Vec<String>>,
    impact_notes: Option<String>,
    status: Option<String>,
    verified: Option<bool>,
    ai_confidence: Option<i32>,
    ai_analysis: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IncidentRow> for Incident {
    fn from(row: IncidentRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            severity: parse_severity(&row.severity),
            status: row.status.as_deref().map(parse_status),
            event_type: row.event_type,
            severity_score: row.severity_score,
            title: row.title,
            description: row.description,
            location_address: row.location_address,
            latitude: row.latitude,
            longitude: row.longitude,
            media_urls: row.media_urls,
            impact_notes: row.impact_notes,
            verified: row.verified,
            ai_confidence: row.ai_confidence,
            ai_analysis: row.ai_analysis,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn parse_severity(value: &str) -> Severity {
    match value.to_ascii_lowercase().as_str() {
        "low" => Severity::Low,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        other => {
            warn!(severity = %other, "Unknown severity in incidents table");
            Severity::Medium
        }
    }
}

fn parse_status(value: &str) -> IncidentStatus {
    if value.eq_ignore_ascii_case("resolved") {
        IncidentStatus::Resolved
    } else {
        IncidentStatus::Active
    }
}

/// Incident store over a Postgres pool.
pub struct PgIncidentStore {
    pool: PgPool,
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn recent_active(&self, limit: u32) -> Result<Vec<Incident>> {
        let sql = format!(
            "SELECT {} FROM incidents WHERE status = 'active' ORDER BY created_at DESC LIMIT $1",
            INCIDENT_COLUMNS
        );
        let rows: Vec<IncidentRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Incident::from).collect())
    }

    async fn active_of_type_since(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let sql = format!(
            "SELECT {} FROM incidents \
             WHERE event_type = $1 AND status = 'active' AND created_at >= $2",
            INCIDENT_COLUMNS
        );
        let rows: Vec<IncidentRow> = sqlx::query_as(&sql)
            .bind(event_type)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Incident::from).collect())
    }

    async fn created_since(
        &self,
        since: DateTime<Utc>,
        event_type: Option<&str>,
    ) -> Result<Vec<Incident>> {
        let sql = format!(
            "SELECT {} FROM incidents \
             WHERE created_at >= $1 AND ($2::text IS NULL OR event_type::text = $2) \
             ORDER BY created_at DESC",
            INCIDENT_COLUMNS
        );
        let rows: Vec<IncidentRow> = sqlx::query_as(&sql)
            .bind(since)
            .bind(event_type)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Incident::from).collect())
    }

    async fn insert(&self, incident: &NewIncident) -> Result<Incident> {
        let sql = format!(
            r#"
            INSERT INTO incidents (
                event_type, severity, severity_score, title, description,
                location_address, latitude, longitude, impact_notes, media_urls,
                status, verified, ai_confidence, ai_analysis
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            INCIDENT_COLUMNS
        );
        let row: IncidentRow = sqlx::query_as(&sql)
            .bind(&incident.event_type)
            .bind(incident.severity.as_str())
            .bind(incident.severity_score)
            .bind(&incident.title)
            .bind(&incident.description)
            .bind(&incident.location_address)
            .bind(incident.latitude)
            .bind(incident.longitude)
            .bind(&incident.impact_notes)
            .bind(&incident.media_urls)
            .bind(incident.status.as_str())
            .bind(incident.verified)
            .bind(incident.ai_confidence)
            .bind(&incident.ai_analysis)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_severity_is_lenient() {
        assert_eq!(parse_severity("HIGH"), Severity::High);
        assert_eq!(parse_severity("low"), Severity::Low);
        assert_eq!(parse_severity("critical"), Severity::Medium);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("resolved"), IncidentStatus::Resolved);
        assert_eq!(parse_status("active"), IncidentStatus::Active);
    }
}

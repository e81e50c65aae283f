//! Incident storage.
//!
//! Incidents are owned by the managed backend. Handlers reach them through
//! [`IncidentStore`], backed either by the PostgREST API of the backend
//! ([`RestIncidentStore`]) or by a direct Postgres pool
//! ([`crate::db::PgIncidentStore`]).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::models::{Incident, NewIncident};
use crate::{Config, Error, Result};

/// Read/write access to the incidents table.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Most recent active incidents, newest first.
    async fn recent_active(&self, limit: u32) -> Result<Vec<Incident>>;

    /// Active incidents of one type created at or after `since`.
    async fn active_of_type_since(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>>;

    /// Incidents of any status created at or after `since`, newest first,
    /// optionally restricted to one type.
    async fn created_since(
        &self,
        since: DateTime<Utc>,
        event_type: Option<&str>,
    ) -> Result<Vec<Incident>>;

    /// Insert a new incident and return the stored row.
    async fn insert(&self, incident: &NewIncident) -> Result<Incident>;
}

/// Client for the backend's PostgREST endpoint.
pub struct RestIncidentStore {
    http_client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl RestIncidentStore {
    pub fn new(http_client: reqwest::Client, project_url: &str, service_key: &str) -> Self {
        Self {
            http_client,
            base_url: format!("{}/rest/v1/incidents", project_url.trim_end_matches('/')),
            service_key: service_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, &self.base_url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn fetch(&self, query: &[(&str, String)]) -> Result<Vec<Incident>> {
        let response = self.request(reqwest::Method::GET).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_text, "Incident query failed");
            return Err(Error::Store(format!("incident query returned {}", status)));
        }

        Ok(response.json().await?)
    }
}

fn timestamp_param(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn history_query(since: DateTime<Utc>, event_type: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "*".to_string()),
        ("created_at", format!("gte.{}", timestamp_param(since))),
        ("order", "created_at.desc".to_string()),
    ];
    if let Some(event_type) = event_type {
        query.push(("event_type", format!("eq.{}", event_type)));
    }
    query
}

#[async_trait]
impl IncidentStore for RestIncidentStore {
    async fn recent_active(&self, limit: u32) -> Result<Vec<Incident>> {
        self.fetch(&[
            ("select", "*".to_string()),
            ("status", "eq.active".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ])
        .await
    }

    async fn active_of_type_since(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        self.fetch(&[
            ("select", "*".to_string()),
            ("event_type", format!("eq.{}", event_type)),
            ("status", "eq.active".to_string()),
            (
                "created_at",
                format!("gte.{}", timestamp_param(since)),
            ),
        ])
        .await
    }

    async fn created_since(
        &self,
        since: DateTime<Utc>,
        event_type: Option<&str>,
    ) -> Result<Vec<Incident>> {
        self.fetch(&history_query(since, event_type)).await
    }

    async fn insert(&self, incident: &NewIncident) -> Result<Incident> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(incident)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_text, "Incident insert failed");
            return Err(Error::Store(format!("incident insert returned {}", status)));
        }

        let mut rows: Vec<Incident> = response.json().await?;
        rows.pop()
            .ok_or_else(|| Error::Store("insert returned no row".to_string()))
    }
}

/// Pick the incident store the configuration allows, if any.
///
/// A direct database URL wins over the REST endpoint.
pub async fn connect_store(
    config: &Config,
    http_client: &reqwest::Client,
) -> Result<Option<Arc<dyn IncidentStore>>> {
    if let Some(database_url) = &config.database_url {
        let pool = crate::db::create_pool(database_url).await?;
        info!("Using direct Postgres incident store");
        return Ok(Some(Arc::new(crate::db::PgIncidentStore::new(pool))));
    }

    match (&config.storage_url, &config.storage_key) {
        (Some(url), Some(key)) => {
            info!("Using REST incident store");
            Ok(Some(Arc::new(RestIncidentStore::new(
                http_client.clone(),
                url,
                key,
            ))))
        }
        _ => Ok(None),
    }
}

/// Unwrap an optional store, failing with a configuration error.
pub fn require_store(store: &Option<Arc<dyn IncidentStore>>) -> Result<&Arc<dyn IncidentStore>> {
    store
        .as_ref()
        .ok_or_else(|| Error::Config("Incident storage not configured".to_string()))
}

//! AWS Secrets Manager integration for provider API keys.

use aws_sdk_secretsmanager::Client as SecretsClient;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::info;

use crate::{Config, Error, Result};

/// Cached secrets with lazy initialization.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    {
        let cache = get_cache().read().await;
        if let Some(value) = cache.get(secret_arn) {
            return Ok(value.clone());
        }
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    {
        let mut cache = get_cache().write().await;
        cache.insert(secret_arn.to_string(), secret_string.clone());
    }

    Ok(secret_string)
}

/// Fill API keys the environment left unset from a JSON secret.
///
/// The secret uses the same key names as the environment variables. Values
/// already present in `config` win.
pub fn merge_secret_values(config: &mut Config, secret_json: &str) -> Result<()> {
    let values: HashMap<String, String> = serde_json::from_str(secret_json)
        .map_err(|e| Error::Aws(format!("Failed to parse API key secret: {}", e)))?;

    let fill = |slot: &mut Option<String>, name: &str| {
        if slot.is_none() {
            *slot = values.get(name).filter(|v| !v.is_empty()).cloned();
        }
    };

    fill(&mut config.weather_api_key, "OPENWEATHERMAP_API_KEY");
    fill(&mut config.traffic_api_key, "TOMTOM_API_KEY");
    fill(&mut config.llm_api_key, "LLM_GATEWAY_API_KEY");
    fill(&mut config.storage_url, "SUPABASE_URL");
    fill(&mut config.storage_key, "SUPABASE_SERVICE_ROLE_KEY");
    fill(&mut config.database_url, "DATABASE_URL");

    Ok(())
}

/// Load configuration from the environment, then apply `NEXUS_SECRETS_ARN` if set.
pub async fn load_config() -> Result<Config> {
    let mut config = Config::from_env();

    if let Ok(secret_arn) = std::env::var("NEXUS_SECRETS_ARN") {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SecretsClient::new(&aws_config);
        let secret = get_secret(&client, &secret_arn).await?;
        merge_secret_values(&mut config, &secret)?;
        info!(secret_arn = %secret_arn, "Applied API keys from Secrets Manager");
    }

    Ok(config)
}

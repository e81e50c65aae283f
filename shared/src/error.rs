//! Error types for Nexus Lambda functions.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Nexus Lambda functions.
#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration (usually an API key) is missing
    #[error("Configuration error: {0}")]
    Config(String),

    /// A third-party provider or the LLM gateway answered with a failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Incident storage service error
    #[error("Storage error: {0}")]
    Store(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Upstream(_) => 502,
            _ => 500,
        }
    }

    /// Message shown to API callers; upstream failures pass the provider's text through.
    pub fn client_message(&self) -> String {
        match self {
            Error::Upstream(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("bad".into()).status_code(), 400);
        assert_eq!(Error::Upstream("down".into()).status_code(), 502);
        assert_eq!(Error::Config("missing key".into()).status_code(), 500);
    }

    #[test]
    fn test_client_message_unwraps_upstream() {
        assert_eq!(Error::Upstream("city not found".into()).client_message(), "city not found");
        assert_eq!(
            Error::Validation("query is required".into()).client_message(),
            "Validation error: query is required"
        );
    }

    #[test]
    fn test_config_error_message() {
        let err = Error::Config("TOMTOM_API_KEY not configured".into());
        assert_eq!(err.to_string(), "Configuration error: TOMTOM_API_KEY not configured");
    }
}

//! Shared library for Nexus Lambda functions.
//!
//! Provider clients, the incident store, and the handler logic behind the
//! weather, traffic, ai-query, validate-incident and incidents endpoints.

pub mod assistant;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod llm;
pub mod models;
pub mod reports;
pub mod secrets;
pub mod store;
pub mod traffic;
pub mod validation;
pub mod weather;

pub use config::Config;
pub use error::{Error, Result};
pub use llm::{ChatModel, GatewayClient};
pub use models::{Incident, IncidentCandidate, IncidentSubmission, Severity};
pub use secrets::{get_secret, load_config};
pub use store::{connect_store, IncidentStore};

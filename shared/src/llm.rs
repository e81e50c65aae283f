//! LLM gateway client (OpenAI-compatible chat completions).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{Config, Error, Result};

/// A chat model that answers one system + user exchange.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the prompt pair and return the first choice's text.
    ///
    /// A response without any choice yields an empty string.
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default()
    }
}

/// Client for the hosted LLM gateway.
pub struct GatewayClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GatewayClient {
    pub fn new(http_client: reqwest::Client, endpoint: String, api_key: String, model: String) -> Self {
        Self {
            http_client,
            endpoint,
            api_key,
            model,
        }
    }

    /// Build a client from configuration, failing if the gateway key is absent.
    pub fn from_config(config: &Config, http_client: reqwest::Client) -> Result<Self> {
        let api_key = config.require_llm_key()?.to_string();
        Ok(Self::new(
            http_client,
            config.llm_endpoint.clone(),
            api_key,
            config.llm_model.clone(),
        ))
    }
}

#[async_trait]
impl ChatModel for GatewayClient {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_text, "LLM gateway error");
            return Err(Error::Upstream(format!("LLM gateway returned {}", status)));
        }

        let chat: ChatResponse = response.json().await?;
        Ok(chat.into_text())
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::ProviderConfig;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("generation service unavailable: {0}")]
    Unavailable(String),
    #[error("generation service signaled rate limiting")]
    RateLimited,
    #[error("invalid generation request: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, ProviderError>;

    /// Cheap connectivity check. The default issues a minimal one-token
    /// generation; real providers may override with a lighter endpoint.
    async fn probe(&self, model_id: &str) -> Result<(), ProviderError> {
        let ping = [ChatMessage::new("user", "ping")];
        self.generate(model_id, &ping).await.map(|_| ())
    }
}

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    content: String,
}

/// OpenAI-format HTTP provider. Any service speaking the chat-completions
/// shape works through `provider.base_url`.
pub struct GenericProvider {
    config: ProviderConfig,
    api_key: String,
    client: Client,
}

impl GenericProvider {
    pub fn new(config: ProviderConfig, api_key: String) -> Self {
        Self {
            config,
            api_key,
            client: Client::new(),
        }
    }

    async fn request(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<String, ProviderError> {
        let req_messages: Vec<OpenAiMessage> = messages
            .iter()
            .map(|m| OpenAiMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let req = OpenAiRequest {
            model: model_id,
            messages: req_messages,
            max_tokens,
        };

        let res = self
            .client
            .post(&self.config.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status.is_client_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Invalid(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("{}: {}", status, body)));
        }

        let parsed: OpenAiResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl LlmProvider for GenericProvider {
    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, ProviderError> {
        self.request(model_id, messages, None).await
    }

    async fn probe(&self, model_id: &str) -> Result<(), ProviderError> {
        let ping = [ChatMessage::new("user", "ping")];
        self.request(model_id, &ping, Some(1)).await.map(|_| ())
    }
}

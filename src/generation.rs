//! Text-generation provider abstraction.
//!
//! The reranker and the grounded generator only need "messages in, text
//! out", so the [`GenerationProvider`] trait is narrow. Tests
//! substitute deterministic fakes; production binds it to an
//! OpenAI-compatible `/chat/completions` endpoint.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::openai::OpenAiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Run one completion and return the model's text, untrimmed.
    async fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Always fails; used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        bail!("Generation provider is disabled. Set [generation] provider in config.")
    }
}

/// Chat-completions client for `POST {base_url}/chat/completions`.
pub struct OpenAIChatProvider {
    model: String,
    http: OpenAiClient,
}

impl OpenAIChatProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let http = OpenAiClient::new(&config.base_url, config.timeout_secs, config.max_retries)?;
        Ok(Self { model, http })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": messages,
        });

        let json = self.http.post_json("/chat/completions", &body).await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Create the configured [`GenerationProvider`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIChatProvider::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::system("be careful")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "be careful");
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": " 2,1 "}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), " 2,1 ");
    }

    #[test]
    fn test_parse_chat_response_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&json).is_err());
    }

    #[test]
    fn test_create_disabled_generator() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.model_name(), "disabled");
    }
}

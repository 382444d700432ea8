//! Chat-completion capability.
//!
//! Used by the language detector (tightly constrained, deterministic prompt)
//! and by the answer enhancer (short, moderately creative rewrite).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ChatConfig;
use crate::openai;

/// Sampling bounds for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Generative text capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete a single system + user exchange and return the assistant text.
    async fn generate(&self, system: &str, user: &str, opts: &GenerateOptions) -> Result<String>;
}

/// A chat model that always fails.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _system: &str, _user: &str, _opts: &GenerateOptions) -> Result<String> {
        bail!("Chat provider is disabled")
    }
}

/// Chat model backed by the OpenAI chat-completions API.
pub struct OpenAIChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAIChat {
    /// Create a new OpenAI chat client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = openai::api_key_from_env()?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ChatConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: openai::build_client(config.timeout_secs)?,
            url: openai::endpoint(&config.base_url, "chat/completions"),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, user: &str, opts: &GenerateOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
        });

        let json =
            openai::post_json(&self.client, &self.url, &self.api_key, &body, self.max_retries)
                .await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`, trimmed.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))?;

    Ok(content.trim().to_string())
}

/// Create the configured [`ChatModel`].
pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

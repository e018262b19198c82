//! Chat-completion transport for entity extraction.
//!
//! One trait, one real backend. The trait exists so the harvest loop can be
//! driven by a scripted model in tests; retry and validation live in the
//! caller, which owns the merge protocol.

use crate::config::LlmConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends one system/user exchange and returns the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat endpoint. Works against api.openai.com and any
/// server speaking the same `/chat/completions` shape.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    top_p: f64,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow!(
                "environment variable {} not set (required for llm provider \"openai\")",
                config.api_key_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: config.resolved_api_base(),
            api_key,
            model: config.resolved_model(),
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": self.temperature,
            "top_p": self.top_p,
        });
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Chat request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!(
                "Chat request failed with status {}: {}",
                status,
                truncate(&detail, 500)
            );
        }
        let payload: Value = response
            .json()
            .await
            .context("Chat response was not valid JSON")?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Chat response missing choices[0].message.content"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Builds the configured chat model. Errors when the provider is disabled so
/// command handlers can check `is_enabled` first and print guidance instead.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "disabled" => bail!(
            "LLM provider is disabled; set [llm] provider = \"openai\" in the config to enable extraction"
        ),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

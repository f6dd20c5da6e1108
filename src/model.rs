//! Model Client
//!
//! OpenAI-compatible chat completions client behind the [`ModelProvider`]
//! boundary. The pipeline only ever sees "system + user prompt in, text
//! out"; the concrete endpoint (Groq, Ollama's compat API, any gateway)
//! stays a configuration detail.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Settings;

/// Model-calling capability. One implementation per endpoint family;
/// tests script this boundary directly.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one completion: system context plus user prompt, text back.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Model client configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Chat completions base URL (".../openai/v1" style).
    pub base_url: String,
    /// Bearer key.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Max response tokens.
    pub max_tokens: usize,
    /// Sampling temperature. Low for planning consistency.
    pub temperature: f32,
}

impl ModelConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.model_url.clone(),
            api_key: settings.model_api_key.clone(),
            model: settings.model_name.clone(),
            timeout: Duration::from_secs(60),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

/// HTTP model client
pub struct ModelClient {
    config: ModelConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(ModelConfig::from_settings(settings))
    }
}

#[async_trait]
impl ModelProvider for ModelClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let messages = vec![
            ChatMessage { role: "system", content: system },
            ChatMessage { role: "user", content: prompt },
        ];

        let response = self.client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": self.config.model,
                "messages": messages,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
            }))
            .send()
            .await
            .context("Failed to send completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("model endpoint error {}: {}", status, body);
        }

        let result: ChatCompletionResponse = response.json().await
            .context("Failed to parse completion response")?;

        let content = result.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            anyhow::bail!("model returned an empty completion");
        }

        debug!("completion: {} chars", content.len());
        Ok(content.trim().to_string())
    }
}

//! Message delivery adapter
//!
//! Posts a text payload to a webhook-style relay. The only adapter with
//! external side effects; everything else in the tool set is read-only.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::agent::tools::{ArgKind, ToolAdapter, ToolArgs, ToolOutput};
use crate::format::truncate_chars;

/// Hard ceiling on outbound message length (platform message limit).
const MAX_MESSAGE_CHARS: usize = 2000;

pub struct MessagingTool {
    client: reqwest::Client,
    webhook_url: String,
}

impl MessagingTool {
    pub fn new(webhook_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, webhook_url: webhook_url.to_string() }
    }
}

#[async_trait]
impl ToolAdapter for MessagingTool {
    fn name(&self) -> &str {
        "message"
    }

    fn accepts(&self) -> ArgKind {
        ArgKind::Message
    }

    fn description(&self) -> &str {
        "Send a text message to a channel."
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolOutput> {
        let ToolArgs::Message { channel_id, text } = args else {
            anyhow::bail!("messaging adapter received a non-message argument variant");
        };

        let content = truncate_chars(&text, MAX_MESSAGE_CHARS);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({
                "channel": channel_id,
                "content": content,
            }))
            .send()
            .await
            .context("Failed to send message")?;

        if !response.status().is_success() {
            anyhow::bail!("message delivery failed: {}", response.status());
        }

        Ok(ToolOutput::text(format!(
            "delivered {} chars to channel {}",
            content.chars().count(),
            channel_id
        )))
    }
}

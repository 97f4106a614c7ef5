//! Outbound delivery to the chat webhook

use async_trait::async_trait;
use dtalks_core::{AppError, BlockMessage, MessageSink, OutboundMessage};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Posts every reply as JSON to a single webhook URL
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> dtalks_core::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::external("webhook", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Webhook rejected message");
            return Err(AppError::external(
                "webhook",
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }
        debug!(status = status.as_u16(), "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    async fn send_text(&self, text: &str) -> dtalks_core::Result<()> {
        self.post(&OutboundMessage::text(text)).await
    }

    async fn send_blocks(&self, message: &BlockMessage) -> dtalks_core::Result<()> {
        self.post(message).await
    }
}

//! OpenAI-compatible chat completion client
//!
//! Backs both answer generation and the model-based moderation stage, which
//! differ only in model, temperature and token budget.

use async_trait::async_trait;
use dtalks_core::{Generator, ModerationVerdict, SafetyModerator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{build_http_client, ensure_success, trim_base};
use crate::resilience::retry::{retry_with, RetryConfig, RetryPolicy};
use crate::{InfraError, Result};

const SERVICE: &str = "chat-completion";

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl ChatClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
    config: ChatClientConfig,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            endpoint: format!("{}/chat/completions", trim_base(&config.base_url)),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Single user-turn completion
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        retry_with(
            &self.retry,
            || self.send(prompt),
            |e: &InfraError| {
                let transient = e.is_transient();
                if transient {
                    warn!(error = %e, "Retrying chat completion");
                }
                transient
            },
        )
        .await
    }

    async fn send(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let body: ChatResponse = ensure_success(SERVICE, response).await?.json().await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InfraError::external(SERVICE, "response contained no message"))
    }
}

#[async_trait]
impl Generator for ChatClient {
    #[instrument(skip(self, prompt), fields(model = %self.config.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> dtalks_core::Result<String> {
        let text = self.complete(prompt).await?;
        debug!(reply_len = text.len(), "Generated completion");
        Ok(text)
    }
}

/// Safety classifier speaking the Llama Guard convention: the reply is
/// `safe`, or `unsafe` followed by the violated categories.
pub struct ChatModerator {
    inner: ChatClient,
}

impl ChatModerator {
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        Ok(Self {
            inner: ChatClient::new(config.with_temperature(0.0).with_max_tokens(100))?,
        })
    }

    pub fn parse_verdict(reply: &str) -> ModerationVerdict {
        let lowered = reply.trim().to_lowercase();
        if lowered.contains("unsafe") {
            ModerationVerdict::Unsafe {
                categories: lowered.replace("unsafe", "").trim().to_string(),
            }
        } else {
            ModerationVerdict::Safe
        }
    }
}

#[async_trait]
impl SafetyModerator for ChatModerator {
    async fn moderate(&self, text: &str) -> dtalks_core::Result<ModerationVerdict> {
        let reply = self.inner.complete(text).await?;
        Ok(Self::parse_verdict(&reply))
    }
}

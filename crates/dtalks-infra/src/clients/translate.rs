use async_trait::async_trait;
use dtalks_core::{Translation, Translator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{build_http_client, ensure_success, trim_base};
use crate::resilience::retry::{retry_with, RetryConfig, RetryPolicy};
use crate::{InfraError, Result};

const SERVICE: &str = "translation";

/// Line breaks are swapped for this marker on the way out and restored on
/// the way back, otherwise the service merges lines.
const NEWLINE_PLACEHOLDER: &str = "*/";

#[derive(Debug, Clone)]
pub struct DeepLConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_type: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl DeepLConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model_type: "prefer_quality_optimized".to_string(),
            timeout: Duration::from_secs(15),
            retry: RetryConfig::new(2),
        }
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
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    target_lang: &'a str,
    model_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    detected_source_language: String,
    text: String,
}

pub struct DeepLTranslator {
    client: Client,
    endpoint: String,
    config: DeepLConfig,
    retry: RetryPolicy,
}

impl DeepLTranslator {
    /// Target used when the caller passes an empty language
    pub const DEFAULT_TARGET: &'static str = "EN-GB";

    pub fn new(config: DeepLConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            endpoint: format!("{}/translate", trim_base(&config.base_url)),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    async fn send(&self, text: &str, target: &str) -> Result<Translation> {
        let escaped = text.replace('\n', NEWLINE_PLACEHOLDER);
        let request = TranslateRequest {
            text: [escaped.as_str()],
            target_lang: target,
            model_type: &self.config.model_type,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.config.api_key),
            )
            .json(&request)
            .send()
            .await?;
        let body: TranslateResponse = ensure_success(SERVICE, response).await?.json().await?;

        let first = body
            .translations
            .into_iter()
            .next()
            .ok_or_else(|| InfraError::external(SERVICE, "response contained no translation"))?;

        Ok(Translation {
            text: first.text.replace(NEWLINE_PLACEHOLDER, "\n"),
            detected_language: first.detected_source_language,
        })
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> dtalks_core::Result<Translation> {
        let target = if target_language.trim().is_empty() {
            Self::DEFAULT_TARGET
        } else {
            target_language
        };
        let translation = retry_with(
            &self.retry,
            || self.send(text, target),
            InfraError::is_transient,
        )
        .await?;
        debug!(
            target,
            detected = %translation.detected_language,
            "Translated text"
        );
        Ok(translation)
    }
}

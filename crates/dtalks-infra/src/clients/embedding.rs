use async_trait::async_trait;
use dtalks_core::Embedder;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{build_http_client, ensure_success, trim_base};
use crate::resilience::retry::{retry_with, RetryConfig, RetryPolicy};
use crate::{InfraError, Result};

const SERVICE: &str = "embedding";

#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl EmbeddingClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions: 768,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
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
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client
pub struct EmbeddingClient {
    client: Client,
    endpoint: String,
    config: EmbeddingClientConfig,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            endpoint: format!("{}/embeddings", trim_base(&config.base_url)),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    async fn send(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: text,
            dimensions: self.config.dimensions,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let body: EmbeddingResponse = ensure_success(SERVICE, response).await?.json().await?;

        let vector = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| InfraError::external(SERVICE, "response contained no embedding"))?;

        if vector.len() != self.config.dimensions {
            warn!(
                expected = self.config.dimensions,
                actual = vector.len(),
                "Embedding dimension mismatch"
            );
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> dtalks_core::Result<Vec<f32>> {
        let vector = retry_with(&self.retry, || self.send(text), InfraError::is_transient).await?;
        debug!(dim = vector.len(), "Embedded text");
        Ok(vector)
    }
}

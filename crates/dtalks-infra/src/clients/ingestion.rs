use async_trait::async_trait;
use dtalks_core::{FileKind, FilePayload, IngestionSink};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::{build_http_client, ensure_success};
use crate::Result;

const SERVICE: &str = "ingestion";

#[derive(Debug, Serialize)]
struct IngestionRequest<'a> {
    #[serde(flatten)]
    payload: &'a FilePayload,
    kind: FileKind,
}

/// Forwards registered files to the ingestion worker over HTTP
pub struct HttpIngestionSink {
    client: Client,
    url: String,
}

impl HttpIngestionSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IngestionSink for HttpIngestionSink {
    async fn ingest(&self, payload: &FilePayload, kind: FileKind) -> dtalks_core::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&IngestionRequest { payload, kind })
            .send()
            .await
            .map_err(crate::InfraError::from)?;
        ensure_success(SERVICE, response).await?;
        info!(file = %payload.original_file_name, ?kind, "Forwarded file for ingestion");
        Ok(())
    }
}

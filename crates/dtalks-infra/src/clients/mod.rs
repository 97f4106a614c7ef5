//! HTTP clients for the external services

pub mod catalog;
pub mod chat;
pub mod embedding;
pub mod ingestion;
pub mod qdrant;
pub mod translate;
pub mod weather;

pub use catalog::{JsonDocumentAccess, JsonFaqCatalog};
pub use chat::{ChatClient, ChatClientConfig, ChatModerator};
pub use embedding::{EmbeddingClient, EmbeddingClientConfig};
pub use ingestion::HttpIngestionSink;
pub use qdrant::{QdrantClient, QdrantConfig};
pub use translate::{DeepLConfig, DeepLTranslator};
pub use weather::{WeatherConfig, WeatherSituationProvider};

use reqwest::{Client, Response};
use std::time::Duration;

use crate::{InfraError, Result};

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Pass 2xx responses through; turn anything else into [`InfraError::Status`]
pub(crate) async fn ensure_success(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InfraError::Status {
        service: service.to_string(),
        status: status.as_u16(),
        body: truncate(&body, 200),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

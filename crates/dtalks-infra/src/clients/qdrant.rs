//! Nearest-neighbour search over the Qdrant REST API

use async_trait::async_trait;
use dtalks_core::{ScoredPoint, SearchFilter, VectorSearch};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{build_http_client, ensure_success, trim_base};
use crate::Result;

const SERVICE: &str = "vector-search";

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

pub struct QdrantClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantClient {
    pub fn new(config: QdrantConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            base_url: trim_base(&config.url),
            api_key: config.api_key,
        })
    }

    fn filter_clause(filter: &SearchFilter) -> Value {
        json!({
            "must": [{
                "key": filter.field,
                "match": { "any": filter.any_of }
            }]
        })
    }

    async fn search_points(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredPoint>> {
        let request = SearchRequest {
            vector,
            limit,
            with_payload: true,
            filter: filter.map(Self::filter_clause),
        };
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = ensure_success(SERVICE, builder.send().await?).await?;
        let body: SearchResponse = response.json().await?;

        Ok(body
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                score: hit.score,
                payload: hit.payload.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl VectorSearch for QdrantClient {
    #[instrument(skip(self, vector, filter), fields(dim = vector.len()))]
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> dtalks_core::Result<Vec<ScoredPoint>> {
        let points = self
            .search_points(collection, vector, limit, filter.as_ref())
            .await?;
        debug!(hits = points.len(), "Vector search complete");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_with_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/internal_documents/points/search"))
            .and(header("api-key", "qd-key"))
            .and(body_partial_json(json!({
                "limit": 4,
                "with_payload": true,
                "filter": {"must": [{"key": "file_name", "match": {"any": ["규정.pdf"]}}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": 1, "version": 0, "score": 0.82, "payload": {"file_name": "규정.pdf", "text": "연차는 15일"}},
                    {"id": 2, "version": 0, "score": 0.41}
                ],
                "status": "ok",
                "time": 0.001
            })))
            .mount(&server)
            .await;

        let client = QdrantClient::new(QdrantConfig::new(server.uri()).with_api_key("qd-key")).unwrap();
        let hits = client
            .search(
                "internal_documents",
                &[0.1, 0.2],
                4,
                Some(SearchFilter {
                    field: "file_name".to_string(),
                    any_of: vec!["규정.pdf".to_string()],
                }),
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload_str("text"), Some("연차는 15일"));
        assert!(hits[1].payload.is_empty());
    }

    #[tokio::test]
    async fn test_missing_collection_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": {"error": "Collection not found"}
            })))
            .mount(&server)
            .await;

        let client = QdrantClient::new(QdrantConfig::new(server.uri())).unwrap();
        let err = client.search("nope", &[1.0], 1, None).await.unwrap_err();
        assert!(err.is_external());
    }
}

//! Redis-backed semantic response cache
//!
//! Each answer lives in a `vec:<id>` hash holding the question embedding as
//! little-endian `f32` bytes, the answer, the question and the matched
//! template as JSON (empty when there is none). Every hash carries its own
//! expiry. A lookup scans the prefix and keeps the nearest entry by cosine
//! similarity.

use async_trait::async_trait;
use dtalks_core::{CacheConfig, CachedAnswer, Embedder, LinkData, ResponseCache};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::semantic::{cosine_similarity, question_id};
use crate::{InfraError, Result};

const SCAN_BATCH: usize = 256;

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    pub key_prefix: String,
    pub min_similarity: f32,
    pub ttl: Duration,
    pub max_memory: Option<String>,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self::from_cache_config("redis://127.0.0.1:6379", &CacheConfig::default())
    }
}

impl RedisCacheConfig {
    pub fn from_cache_config(url: impl Into<String>, cache: &CacheConfig) -> Self {
        Self {
            url: url.into(),
            key_prefix: String::from("vec:"),
            min_similarity: cache.min_similarity,
            ttl: cache.ttl(),
            max_memory: cache.redis_max_memory.clone(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

#[derive(Clone)]
pub struct RedisSemanticCache {
    embedder: Arc<dyn Embedder>,
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl RedisSemanticCache {
    pub async fn new(embedder: Arc<dyn Embedder>, config: RedisCacheConfig) -> Result<Self> {
        info!("Connecting response cache to Redis at {}", config.url);

        let client = Client::open(config.url.clone())?;
        let connection = ConnectionManager::new(client).await?;

        let cache = Self {
            embedder,
            connection,
            config,
        };
        cache.configure_eviction().await;
        Ok(cache)
    }

    /// Cap server memory and evict least recently used keys. Managed
    /// deployments often reject CONFIG, which only costs a warning.
    async fn configure_eviction(&self) {
        let Some(max_memory) = &self.config.max_memory else {
            return;
        };
        let mut conn = self.connection.clone();
        let result: redis::RedisResult<()> = redis::pipe()
            .cmd("CONFIG")
            .arg("SET")
            .arg("maxmemory-policy")
            .arg("allkeys-lru")
            .ignore()
            .cmd("CONFIG")
            .arg("SET")
            .arg("maxmemory")
            .arg(max_memory)
            .ignore()
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => info!(max_memory = %max_memory, "Redis eviction set to allkeys-lru"),
            Err(e) => warn!(error = %e, "Could not configure Redis eviction"),
        }
    }

    async fn cached_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", self.config.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn nearest(&self, vector: &[f32]) -> Result<Option<(String, f32)>> {
        let keys = self.cached_keys().await?;
        if keys.is_empty() {
            return Ok(None);
        }

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.hget(key, "vec");
        }
        let mut conn = self.connection.clone();
        let stored: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;

        let candidates = keys.into_iter().zip(stored).filter_map(|(key, bytes)| {
            // expired between SCAN and HGET
            let bytes = bytes?;
            match decode_vector(&bytes) {
                Some(v) => Some((key, v)),
                None => {
                    warn!(key = %key, "Skipping cache entry with a malformed vector");
                    None
                }
            }
        });
        Ok(best_match(vector, candidates))
    }

    async fn find(&self, question: &str) -> Result<Option<CachedAnswer>> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| InfraError::external("embedding", e))?;

        let Some((key, similarity)) = self.nearest(&vector).await? else {
            return Ok(None);
        };
        if similarity < self.config.min_similarity {
            debug!(similarity, "Semantic cache miss below threshold");
            return Ok(None);
        }

        let mut conn = self.connection.clone();
        let (answer, template): (Option<String>, Option<String>) = redis::pipe()
            .hget(&key, "answer")
            .hget(&key, "matched_template")
            .query_async(&mut conn)
            .await?;

        let Some(answer) = answer.filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        debug!(key = %key, similarity, "Semantic cache hit");
        Ok(Some(CachedAnswer {
            answer,
            similarity,
            matched_template: template.as_deref().and_then(decode_template),
        }))
    }

    async fn put(
        &self,
        question: &str,
        answer: &str,
        matched_template: Option<&LinkData>,
    ) -> Result<String> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| InfraError::external("embedding", e))?;
        let id = question_id(question);
        let key = self.config.key_for(&id);

        let fields: Vec<(&str, Vec<u8>)> = vec![
            ("id", id.clone().into_bytes()),
            ("vec", encode_vector(&vector)),
            ("answer", answer.as_bytes().to_vec()),
            ("question", question.as_bytes().to_vec()),
            ("matched_template", encode_template(matched_template)?.into_bytes()),
        ];

        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields[..])
            .ignore()
            .expire(&key, self.config.ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(key = %key, "Cached answer");
        Ok(id)
    }

    /// Remove a cached answer by id
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.config.key_for(id)).await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for RedisSemanticCache {
    async fn lookup(&self, question: &str) -> dtalks_core::Result<Option<CachedAnswer>> {
        Ok(self.find(question).await?)
    }

    async fn store(
        &self,
        question: &str,
        answer: &str,
        matched_template: Option<&LinkData>,
    ) -> dtalks_core::Result<String> {
        Ok(self.put(question, answer, matched_template).await?)
    }
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `None` unless the bytes are a whole number of `f32`s
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn encode_template(template: Option<&LinkData>) -> Result<String> {
    match template {
        Some(link) => Ok(serde_json::to_string(link)?),
        None => Ok(String::new()),
    }
}

fn decode_template(raw: &str) -> Option<LinkData> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

/// Highest cosine similarity among `candidates`
fn best_match(
    query: &[f32],
    candidates: impl IntoIterator<Item = (String, Vec<f32>)>,
) -> Option<(String, f32)> {
    candidates
        .into_iter()
        .map(|(key, v)| {
            let similarity = cosine_similarity(query, &v);
            (key, similarity)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

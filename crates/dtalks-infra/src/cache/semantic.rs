//! In-memory semantic response cache
//!
//! Answers are stored with the embedding of the question that produced them.
//! A lookup embeds the new question and returns the closest live entry by
//! cosine similarity, provided it clears the similarity gate.

use async_trait::async_trait;
use dtalks_core::{CacheConfig, CachedAnswer, Embedder, LinkData, ResponseCache};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Stable short id of a question: the first 12 hex chars of its SHA-256
pub fn question_id(question: &str) -> String {
    let digest = Sha256::digest(question.as_bytes());
    hex::encode(digest)[..12].to_string()
}

#[derive(Clone)]
struct CacheEntry {
    question: String,
    answer: String,
    vector: Vec<f32>,
    matched_template: Option<LinkData>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Instant::now() > exp).unwrap_or(false)
    }
}

/// Configuration for the semantic cache
#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    pub min_similarity: f32,
    pub ttl: Option<Duration>,
    pub max_entries: usize,
    pub cleanup_interval: Option<Duration>,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for SemanticCacheConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            min_similarity: config.min_similarity,
            ttl: Some(config.ttl()),
            max_entries: config.max_entries.max(1),
            cleanup_interval: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Clone)]
pub struct MemorySemanticCache {
    embedder: Arc<dyn Embedder>,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    config: SemanticCacheConfig,
}

impl MemorySemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>, config: SemanticCacheConfig) -> Self {
        let cache = Self {
            embedder,
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
        };

        if let Some(interval) = cache.config.cleanup_interval {
            let entries = Arc::clone(&cache.entries);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let mut entries = entries.write().await;
                    let before = entries.len();
                    entries.retain(|_, v| !v.is_expired());
                    let removed = before - entries.len();
                    if removed > 0 {
                        debug!(removed, "Semantic cache cleanup");
                    }
                }
            });
        }

        cache
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Cached question text for an id
    pub async fn question(&self, id: &str) -> Option<String> {
        self.entries.read().await.get(id).map(|e| e.question.clone())
    }

    fn evict_one(entries: &mut HashMap<String, CacheEntry>) {
        let victim = entries
            .iter()
            .find(|(_, v)| v.is_expired())
            .or_else(|| entries.iter().min_by_key(|(_, v)| v.expires_at))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            entries.remove(&key);
        }
    }
}

#[async_trait]
impl ResponseCache for MemorySemanticCache {
    async fn lookup(&self, question: &str) -> dtalks_core::Result<Option<CachedAnswer>> {
        let vector = self.embedder.embed(question).await?;
        let entries = self.entries.read().await;

        let best = entries
            .values()
            .filter(|e| !e.is_expired())
            .map(|e| (cosine_similarity(&vector, &e.vector), e))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((similarity, entry)) if similarity >= self.config.min_similarity => {
                debug!(similarity, "Semantic cache hit");
                Ok(Some(CachedAnswer {
                    answer: entry.answer.clone(),
                    similarity,
                    matched_template: entry.matched_template.clone(),
                }))
            }
            Some((similarity, _)) => {
                debug!(similarity, "Semantic cache miss below threshold");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        question: &str,
        answer: &str,
        matched_template: Option<&LinkData>,
    ) -> dtalks_core::Result<String> {
        let vector = self.embedder.embed(question).await?;
        let id = question_id(question);
        let entry = CacheEntry {
            question: question.to_string(),
            answer: answer.to_string(),
            vector,
            matched_template: matched_template.cloned(),
            expires_at: self.config.ttl.map(|ttl| Instant::now() + ttl),
        };

        let mut entries = self.entries.write().await;
        if entries.len() >= self.config.max_entries && !entries.contains_key(&id) {
            Self::evict_one(&mut entries);
        }
        entries.insert(id.clone(), entry);
        debug!(id = %id, "Cached answer");
        Ok(id)
    }
}

/// Cosine similarity; zero for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

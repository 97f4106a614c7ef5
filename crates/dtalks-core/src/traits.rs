//! Seams for the external collaborators
//!
//! Every remote service the pipeline touches sits behind one of these traits so
//! it can be injected as `Arc<dyn Trait>` and faked in tests.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::blocks::BlockMessage;
use crate::error::Result;
use crate::types::{
    ConversationTurn, FaqAnswer, FaqCategory, FaqQuestion, FileKind, FilePayload, LinkData,
};

/// Large language model completion
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Text embedding service
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Translated text with the language the service detected in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub detected_language: String,
}

/// Machine translation service
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<Translation>;
}

/// Verdict of the model-based moderation stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Safe,
    Unsafe { categories: String },
}

/// Secondary safety classifier
#[async_trait]
pub trait SafetyModerator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict>;
}

/// Restricts a search to points whose `field` matches any of the values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub field: String,
    pub any_of: Vec<String>,
}

/// Nearest-neighbour hit with its payload
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    /// Cosine similarity
    pub score: f32,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl ScoredPoint {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// External nearest-neighbour search over named collections
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<ScoredPoint>>;
}

/// Per-user document authorization lookup
#[async_trait]
pub trait DocumentAccess: Send + Sync {
    /// File names the user may see
    async fn authorized_files(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Browsable FAQ catalogue
#[async_trait]
pub trait FaqCatalog: Send + Sync {
    async fn categories(&self) -> Result<Vec<FaqCategory>>;
    async fn questions(&self, category_id: i64) -> Result<Vec<FaqQuestion>>;
    async fn answer(&self, faq_id: i64) -> Result<Option<FaqAnswer>>;
}

/// Live situational data used to colour small talk
#[derive(Debug, Clone, PartialEq)]
pub struct Situation {
    pub now: DateTime<Local>,
    pub location: String,
    pub temperature: String,
    pub rainfall: String,
    pub humidity: String,
}

impl Situation {
    pub const DEFAULT_LOCATION: &'static str = "서울특별시 강남구 역삼1동";

    /// Static values used when the provider is unavailable
    pub fn fallback(now: DateTime<Local>) -> Self {
        Self {
            now,
            location: Self::DEFAULT_LOCATION.to_string(),
            temperature: "22".to_string(),
            rainfall: "0".to_string(),
            humidity: "65".to_string(),
        }
    }
}

#[async_trait]
pub trait SituationProvider: Send + Sync {
    async fn current(&self) -> Result<Situation>;
}

/// Outbound delivery to the chat channel
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn send_blocks(&self, message: &BlockMessage) -> Result<()>;
}

/// Receiver for registered files; chunking happens behind it
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn ingest(&self, payload: &FilePayload, kind: FileKind) -> Result<()>;
}

/// Storage for per-user rolling conversation history
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Prepend a turn, keep at most `max_turns`, expire after `ttl`
    async fn push(
        &self,
        user_id: &str,
        turn: ConversationTurn,
        max_turns: usize,
        ttl: Duration,
    ) -> Result<()>;

    /// Live turns, newest first
    async fn recent(&self, user_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>>;
}

/// Answer previously generated for a semantically similar question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub similarity: f32,
    pub matched_template: Option<LinkData>,
}

/// Similarity-gated cache of generated answers
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn lookup(&self, question: &str) -> Result<Option<CachedAnswer>>;
    async fn store(
        &self,
        question: &str,
        answer: &str,
        matched_template: Option<&LinkData>,
    ) -> Result<String>;
}

use dtalks_core::{Embedder, VectorSearch};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of the high-precision FAQ match
#[derive(Debug, Clone, PartialEq)]
pub enum FaqLookup {
    Success {
        answer: String,
        score: f32,
        matched_question: String,
        category: String,
    },
    /// Nearest question is too far away; try document search instead
    FallbackToRag { best_score: f32, best_match: String },
    NotFound,
    /// The matching entry carries no answer
    SourceError,
    Error { message: String },
}

pub struct FaqMatcher {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
    collection: String,
    threshold: f32,
    limit: usize,
}

impl FaqMatcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        collection: impl Into<String>,
        threshold: f32,
        limit: usize,
    ) -> Self {
        Self {
            embedder,
            search,
            collection: collection.into(),
            threshold,
            limit: limit.max(1),
        }
    }

    pub async fn find(&self, question: &str) -> FaqLookup {
        let vector = match self.embedder.embed(question).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                return FaqLookup::Error {
                    message: "empty embedding".to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "FAQ embedding failed");
                return FaqLookup::Error {
                    message: e.to_string(),
                };
            }
        };
        let hits = match self
            .search
            .search(&self.collection, &vector, self.limit, None)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "FAQ search failed");
                return FaqLookup::Error {
                    message: e.to_string(),
                };
            }
        };

        let Some(top) = hits.into_iter().next() else {
            return FaqLookup::NotFound;
        };

        if top.score < self.threshold {
            info!(score = top.score, threshold = self.threshold, "FAQ match below threshold");
            return FaqLookup::FallbackToRag {
                best_score: top.score,
                best_match: top.payload_str("question").unwrap_or("N/A").to_string(),
            };
        }

        match top.payload_str("answer") {
            Some(answer) if !answer.is_empty() => {
                debug!(score = top.score, "FAQ matched");
                FaqLookup::Success {
                    answer: answer.to_string(),
                    score: top.score,
                    matched_question: top.payload_str("question").unwrap_or("N/A").to_string(),
                    category: top.payload_str("category").unwrap_or("N/A").to_string(),
                }
            }
            _ => {
                warn!("FAQ match has no answer");
                FaqLookup::SourceError
            }
        }
    }
}

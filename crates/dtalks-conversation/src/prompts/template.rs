use dtalks_core::{Embedder, LinkData, VectorSearch};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata of a matched document template
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMatch {
    pub title: String,
    pub description: String,
    pub url: String,
}

impl TemplateMatch {
    pub fn link(&self) -> LinkData {
        LinkData {
            title: self.title.clone(),
            url: self.url.clone(),
        }
    }
}

/// Result of the template similarity search
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TemplateSearch {
    Success {
        score: f32,
        matched_template: TemplateMatch,
    },
    /// Best hit fell under the threshold
    Fallback { score: f32, best_match: String },
    NotFound,
    Error { message: String },
}

pub struct TemplateFinder {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
    collection: String,
    threshold: f32,
}

impl TemplateFinder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        collection: impl Into<String>,
        threshold: f32,
    ) -> Self {
        Self {
            embedder,
            search,
            collection: collection.into(),
            threshold,
        }
    }

    pub async fn find(&self, query: &str) -> TemplateSearch {
        let vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Template search embedding failed");
                return TemplateSearch::Error {
                    message: e.to_string(),
                };
            }
        };
        let hits = match self.search.search(&self.collection, &vector, 1, None).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Template search failed");
                return TemplateSearch::Error {
                    message: e.to_string(),
                };
            }
        };

        let Some(top) = hits.into_iter().next() else {
            return TemplateSearch::NotFound;
        };
        let field = |key: &str| top.payload_str(key).unwrap_or("N/A").to_string();

        if top.score >= self.threshold {
            debug!(score = top.score, "Template matched");
            TemplateSearch::Success {
                score: top.score,
                matched_template: TemplateMatch {
                    title: field("title"),
                    description: field("description"),
                    url: field("url"),
                },
            }
        } else {
            debug!(score = top.score, "Template below threshold");
            TemplateSearch::Fallback {
                score: top.score,
                best_match: field("title"),
            }
        }
    }

    /// Prompt plus the link of the matched template, if any
    pub async fn build(&self, query: &str) -> (String, Option<LinkData>) {
        let found = self.find(query).await;
        let link = match &found {
            TemplateSearch::Success {
                matched_template, ..
            } => Some(matched_template.link()),
            _ => None,
        };
        let context = serde_json::to_string(&found).unwrap_or_default();

        let prompt = format!(
            r#"You are the company's document management assistant.

Instructions:
- Do not mention accuracy scores in your answers.
- Provide as much information as possible.
- If there is no CONTEXT DATA, say so and provide a draft form.
- Match the language of the User question.
- Write your answer in an easy-to-read key-value pair format.
- Do not display the URL.

Context data: {context}
User question: {query}

Please provide your answer based on the above context data."#
        );
        (prompt, link)
    }
}

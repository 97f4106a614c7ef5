use dtalks_core::{DocumentAccess, Embedder, ScoredPoint, SearchFilter, VectorSearch};
use std::sync::Arc;
use tracing::{debug, warn};

pub const NO_DOCUMENT_PROMPT: &str =
    "**No related data available. Please inform the user politely.**";

const FILE_NAME_FIELD: &str = "file_name";

/// Retrieval over internal documents the user is allowed to read
pub struct DocumentRag {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
    access: Arc<dyn DocumentAccess>,
    collections: Vec<String>,
    min_score: f32,
    limit: usize,
}

impl DocumentRag {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        access: Arc<dyn DocumentAccess>,
        collections: Vec<String>,
        min_score: f32,
        limit: usize,
    ) -> Self {
        Self {
            embedder,
            search,
            access,
            collections,
            min_score,
            limit,
        }
    }

    /// Best hits across all collections, highest score first.
    ///
    /// A user without any granted file gets nothing back.
    pub async fn search(&self, question: &str, user_id: &str) -> Vec<ScoredPoint> {
        let files = match self.access.authorized_files(user_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Document access lookup failed");
                return Vec::new();
            }
        };
        if files.is_empty() {
            debug!(user_id, "User has no authorized documents");
            return Vec::new();
        }

        let vector = match self.embedder.embed(question).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Document search embedding failed");
                return Vec::new();
            }
        };
        let filter = SearchFilter {
            field: FILE_NAME_FIELD.to_string(),
            any_of: files,
        };

        let mut hits = Vec::new();
        for collection in &self.collections {
            match self
                .search
                .search(collection, &vector, self.limit, Some(filter.clone()))
                .await
            {
                Ok(found) => hits.extend(found.into_iter().filter(|h| h.score >= self.min_score)),
                Err(e) => warn!(collection = %collection, error = %e, "Document search failed"),
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    pub async fn build(&self, question: &str, user_id: &str) -> String {
        let hits = self.search(question, user_id).await;
        let Some(document) = hits.into_iter().next() else {
            warn!("No related internal document");
            return NO_DOCUMENT_PROMPT.to_string();
        };
        let context = serde_json::to_string(&document.payload).unwrap_or_default();

        format!(
            r#"You are the one who provides the internal company documents.

INSTRUCTIONS:
- Do not mention accuracy scores in your answers.
- If there is no internal documentation, answer "There is no internal documentation that corresponds to the question."
- Provide the CONTEXT DATA (text, file name) of the internal document corresponding to the question.
- Match the language of the USER QUESTION.

CONTEXT DATA: {context}
USER QUESTION: {question}

Please provide your answer based on the context data above."#
        )
    }
}

use dtalks_core::{Embedder, VectorSearch};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Org-chart lookup over the member collection
pub struct MemberDirectory {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn VectorSearch>,
    collection: String,
    min_score: f32,
    limit: usize,
}

impl MemberDirectory {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        collection: impl Into<String>,
        min_score: f32,
        limit: usize,
    ) -> Self {
        Self {
            embedder,
            search,
            collection: collection.into(),
            min_score,
            limit,
        }
    }

    /// Member records scoring strictly above the floor, each tagged with its
    /// rounded score under `정확도`
    pub async fn find(&self, question: &str) -> Vec<Map<String, Value>> {
        let vector = match self.embedder.embed(question).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Member search embedding failed");
                return Vec::new();
            }
        };
        let hits = match self
            .search
            .search(&self.collection, &vector, self.limit, None)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Member search failed");
                return Vec::new();
            }
        };

        let records: Vec<Map<String, Value>> = hits
            .into_iter()
            .filter_map(|hit| {
                let score = (hit.score as f64 * 1000.0).round() / 1000.0;
                if score <= self.min_score as f64 {
                    return None;
                }
                let mut record = hit.payload;
                record.insert("정확도".to_string(), Value::from(score));
                Some(record)
            })
            .collect();
        debug!(records = records.len(), "Member records found");
        records
    }

    pub async fn build(&self, question: &str) -> String {
        let records = self.find(question).await;
        let context = if records.is_empty() {
            "None".to_string()
        } else {
            serde_json::to_string(&records).unwrap_or_else(|_| "None".to_string())
        };

        format!(
            r#"You are a company HR representative.

INSTRUCTIONS:
- Do NOT mention accuracy scores and employee_number in your response
- Only answer if the user asks about work duties or location
- Match the language of the USER QUESTION.
- Format your response in clean Key-Value pairs for easy reading
- If additional information about duties or location is needed, please inform the user

CONTEXT DATA: {context}
USER QUESTION: {question}

Please provide your answer based on the context data above."#
        )
    }
}

//! Strategy-specific prompt builders and their answer sources

pub mod faq;
pub mod internal;
pub mod member;
pub mod smalltalk;
pub mod template;

pub use faq::{FaqLookup, FaqMatcher};
pub use internal::{DocumentRag, NO_DOCUMENT_PROMPT};
pub use member::MemberDirectory;
pub use smalltalk::SmalltalkPrompt;
pub use template::{TemplateFinder, TemplateMatch, TemplateSearch};

use dtalks_core::{
    DocumentAccess, Embedder, RetrievalConfig, SituationProvider, VectorSearch,
};
use std::sync::Arc;

/// Every answer source the pipeline can dispatch to
pub struct StrategySources {
    pub smalltalk: SmalltalkPrompt,
    pub members: MemberDirectory,
    pub templates: TemplateFinder,
    pub faq: FaqMatcher,
    pub documents: DocumentRag,
}

impl StrategySources {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn VectorSearch>,
        access: Arc<dyn DocumentAccess>,
        situation: Option<Arc<dyn SituationProvider>>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            smalltalk: SmalltalkPrompt::new(situation),
            members: MemberDirectory::new(
                Arc::clone(&embedder),
                Arc::clone(&search),
                &config.member_collection,
                config.member_min_score,
                config.member_limit,
            ),
            templates: TemplateFinder::new(
                Arc::clone(&embedder),
                Arc::clone(&search),
                &config.template_collection,
                config.template_threshold,
            ),
            faq: FaqMatcher::new(
                Arc::clone(&embedder),
                Arc::clone(&search),
                &config.faq_collection,
                config.faq_threshold,
                config.faq_limit,
            ),
            documents: DocumentRag::new(
                embedder,
                search,
                access,
                config.document_collections.clone(),
                config.document_min_score,
                config.document_limit,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dtalks_core::{AppError, ScoredPoint, SearchFilter};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        async fn embed(&self, _text: &str) -> dtalks_core::Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> dtalks_core::Result<Vec<f32>> {
            Err(AppError::external("embedding", "unavailable"))
        }
    }

    /// Canned hits per collection; records every filter it receives
    #[derive(Default)]
    struct CannedSearch {
        hits: HashMap<String, Vec<ScoredPoint>>,
        filters: Mutex<Vec<Option<SearchFilter>>>,
    }

    impl CannedSearch {
        fn with(mut self, collection: &str, hits: Vec<(f32, serde_json::Value)>) -> Self {
            let points = hits
                .into_iter()
                .map(|(score, payload)| ScoredPoint {
                    score,
                    payload: payload.as_object().cloned().unwrap_or_default(),
                })
                .collect();
            self.hits.insert(collection.to_string(), points);
            self
        }
    }

    #[async_trait]
    impl VectorSearch for CannedSearch {
        async fn search(
            &self,
            collection: &str,
            _vector: &[f32],
            limit: usize,
            filter: Option<SearchFilter>,
        ) -> dtalks_core::Result<Vec<ScoredPoint>> {
            self.filters.lock().unwrap().push(filter);
            Ok(self
                .hits
                .get(collection)
                .map(|h| h.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        }
    }

    struct Grants(Vec<String>);

    #[async_trait]
    impl DocumentAccess for Grants {
        async fn authorized_files(&self, _user_id: &str) -> dtalks_core::Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_member_floor_is_strict() {
        let search = CannedSearch::default().with(
            "member_vectors",
            vec![
                (0.81234, json!({"name": "김철수", "department": "IT 개발팀"})),
                (0.5, json!({"name": "이영희"})),
            ],
        );
        let members = MemberDirectory::new(Arc::new(ConstEmbedder), Arc::new(search), "member_vectors", 0.5, 5);

        let records = members.find("개발팀 누구 있어?").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "김철수");
        assert_eq!(records[0]["정확도"], json!(0.812));

        let prompt = members.build("개발팀 누구 있어?").await;
        assert!(prompt.contains("You are a company HR representative."));
        assert!(prompt.contains("USER QUESTION: 개발팀 누구 있어?"));
    }

    #[tokio::test]
    async fn test_member_search_degrades() {
        let members = MemberDirectory::new(
            Arc::new(DownEmbedder),
            Arc::new(CannedSearch::default()),
            "member_vectors",
            0.5,
            5,
        );
        assert!(members.build("조직도").await.contains("CONTEXT DATA: None"));
    }

    #[tokio::test]
    async fn test_template_statuses() {
        let search = Arc::new(CannedSearch::default().with(
            "template_vectors",
            vec![(0.7, json!({"title": "회의록", "description": "개발 회의록", "url": "https://files/minutes.docx"}))],
        ));
        let finder = TemplateFinder::new(Arc::new(ConstEmbedder), search.clone(), "template_vectors", 0.65);
        let (prompt, link) = finder.build("회의록 양식").await;
        assert_eq!(link.unwrap().url, "https://files/minutes.docx");
        assert!(prompt.contains(r#""status":"success""#));

        let strict = TemplateFinder::new(Arc::new(ConstEmbedder), search.clone(), "template_vectors", 0.9);
        assert_eq!(
            strict.find("회의록 양식").await,
            TemplateSearch::Fallback {
                score: 0.7,
                best_match: "회의록".to_string()
            }
        );

        let empty = TemplateFinder::new(Arc::new(ConstEmbedder), search, "other", 0.65);
        let (prompt, link) = empty.build("x").await;
        assert!(link.is_none());
        assert!(prompt.contains(r#""status":"not_found""#));

        let broken = TemplateFinder::new(
            Arc::new(DownEmbedder),
            Arc::new(CannedSearch::default()),
            "template_vectors",
            0.65,
        );
        assert!(matches!(broken.find("x").await, TemplateSearch::Error { .. }));
    }

    #[tokio::test]
    async fn test_faq_statuses() {
        let search = Arc::new(
            CannedSearch::default()
                .with(
                    "faq",
                    vec![(0.9, json!({"question": "연차는 어떻게 신청하나요?", "answer": "그룹웨어에서 신청합니다.", "category": "인사"}))],
                )
                .with("low", vec![(0.6, json!({"question": "급여일은?", "answer": "25일"}))])
                .with("no_answer", vec![(0.95, json!({"question": "빈 답변"}))]),
        );
        let matcher = |collection: &str| {
            FaqMatcher::new(Arc::new(ConstEmbedder), search.clone(), collection, 0.78, 3)
        };

        match matcher("faq").find("휴가 쓰려면?").await {
            FaqLookup::Success { answer, category, .. } => {
                assert_eq!(answer, "그룹웨어에서 신청합니다.");
                assert_eq!(category, "인사");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            matcher("low").find("월급").await,
            FaqLookup::FallbackToRag { .. }
        ));
        assert_eq!(matcher("no_answer").find("?").await, FaqLookup::SourceError);
        assert_eq!(matcher("empty").find("?").await, FaqLookup::NotFound);
    }

    #[tokio::test]
    async fn test_documents_are_filtered_by_grants() {
        let search = Arc::new(
            CannedSearch::default()
                .with(
                    "internal_documents",
                    vec![
                        (0.55, json!({"file_name": "규정.pdf", "text": "재택근무는 주 2회"})),
                        (0.3, json!({"file_name": "규정.pdf", "text": "무관"})),
                    ],
                )
                .with(
                    "meeting_vectors",
                    vec![(0.74, json!({"file_name": "회의.m4a", "text": "재택 확대 논의"}))],
                ),
        );
        let rag = DocumentRag::new(
            Arc::new(ConstEmbedder),
            search.clone(),
            Arc::new(Grants(vec!["규정.pdf".to_string(), "회의.m4a".to_string()])),
            vec!["internal_documents".to_string(), "meeting_vectors".to_string()],
            0.5,
            4,
        );

        let hits = rag.search("재택 규정", "kim").await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload_str("text"), Some("재택 확대 논의"));

        let filters = search.filters.lock().unwrap();
        let filter = filters[0].as_ref().unwrap();
        assert_eq!(filter.field, "file_name");
        assert_eq!(filter.any_of.len(), 2);
        drop(filters);

        let prompt = rag.build("재택 규정", "kim").await;
        assert!(prompt.contains("재택 확대 논의"));
    }

    #[tokio::test]
    async fn test_documents_without_grants() {
        let search = Arc::new(CannedSearch::default().with(
            "internal_documents",
            vec![(0.9, json!({"file_name": "비밀.pdf"}))],
        ));
        let rag = DocumentRag::new(
            Arc::new(ConstEmbedder),
            search.clone(),
            Arc::new(Grants(Vec::new())),
            vec!["internal_documents".to_string()],
            0.5,
            4,
        );

        assert_eq!(rag.build("비밀", "lee").await, NO_DOCUMENT_PROMPT);
        assert!(search.filters.lock().unwrap().is_empty());
    }
}

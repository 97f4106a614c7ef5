use async_trait::async_trait;
use dtalks_conversation::commands::{
    EMPTY_MESSAGE, FAQ_EXITED, FEEDBACK_THANKS, FEEDBACK_WITHOUT_EXCHANGE, NUMBERS_ONLY,
    UNKNOWN_COMMAND,
};
use dtalks_conversation::{
    BlacklistEntry, ChatHandler, ContextSettings, ConversationContext, DialogMode,
    DialogStateStore, Guardrail, HandlerSettings, MemoryContextStore, Outcome, Pipeline,
    PipelineDeps, PipelineSettings, StrategySources, CLARIFY, DEFAULT_REFUSAL, NO_MATCHING_INFO,
};
use dtalks_core::{
    AppError, BlockMessage, CachedAnswer, DocumentAccess, Embedder, FaqAnswer, FaqCatalog,
    FaqCategory, FaqQuestion, Generator, Label, LinkData, MessageSink, ResponseCache,
    RetrievalConfig, ScoredPoint, SearchFilter, Translation, Translator, VectorSearch,
};
use dtalks_infra::MetricsStore;
use dtalks_nlp::{CentroidStore, HybridIntentClassifier, KeywordRules, TextModel};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USER: &str = "user-1";
const GENERATED: &str = "생성된 답변입니다.";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FixedModel {
    label: Label,
    confidence: f64,
}

impl TextModel for FixedModel {
    fn predict(&self, _text: &str, _k: usize) -> dtalks_nlp::Result<Vec<(Label, f64)>> {
        Ok(vec![(self.label.clone(), self.confidence)])
    }

    fn sentence_vector(&self, _text: &str) -> dtalks_nlp::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

#[derive(Default)]
struct ScriptedGenerator {
    prompts: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl ScriptedGenerator {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> dtalks_core::Result<String> {
        if prompt.starts_with("Analyze the relationship") {
            return Ok("[]".to_string());
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::external("llm", "model overloaded"));
        }
        Ok(GENERATED.to_string())
    }
}

/// Leaves Korean untouched; anything else is tagged with its target
struct TaggingTranslator {
    detected: &'static str,
}

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> dtalks_core::Result<Translation> {
        let text = if target_language == "KO" {
            text.to_string()
        } else {
            format!("[{}] {}", target_language, text)
        };
        Ok(Translation {
            text,
            detected_language: self.detected.to_string(),
        })
    }
}

#[derive(Default)]
struct FakeCache {
    hit: Mutex<Option<CachedAnswer>>,
    lookups: AtomicUsize,
    stored: Mutex<Vec<String>>,
}

#[async_trait]
impl ResponseCache for FakeCache {
    async fn lookup(&self, _question: &str) -> dtalks_core::Result<Option<CachedAnswer>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.hit.lock().unwrap().clone())
    }

    async fn store(
        &self,
        question: &str,
        _answer: &str,
        _matched_template: Option<&LinkData>,
    ) -> dtalks_core::Result<String> {
        self.stored.lock().unwrap().push(question.to_string());
        Ok("abc123".to_string())
    }
}

struct ConstEmbedder;

#[async_trait]
impl Embedder for ConstEmbedder {
    async fn embed(&self, _text: &str) -> dtalks_core::Result<Vec<f32>> {
        Ok(vec![0.5, 0.5])
    }
}

#[derive(Default)]
struct CannedSearch {
    hits: HashMap<String, Vec<ScoredPoint>>,
}

impl CannedSearch {
    fn with(mut self, collection: &str, score: f32, payload: serde_json::Value) -> Self {
        self.hits.entry(collection.to_string()).or_default().push(ScoredPoint {
            score,
            payload: payload.as_object().cloned().unwrap_or_default(),
        });
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
        _filter: Option<SearchFilter>,
    ) -> dtalks_core::Result<Vec<ScoredPoint>> {
        Ok(self
            .hits
            .get(collection)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

struct NoGrants;

#[async_trait]
impl DocumentAccess for NoGrants {
    async fn authorized_files(&self, _user_id: &str) -> dtalks_core::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

struct StaticFaq;

#[async_trait]
impl FaqCatalog for StaticFaq {
    async fn categories(&self) -> dtalks_core::Result<Vec<FaqCategory>> {
        Ok(vec![FaqCategory {
            category_id: 1,
            name: "인사".to_string(),
            description: String::new(),
        }])
    }

    async fn questions(&self, category_id: i64) -> dtalks_core::Result<Vec<FaqQuestion>> {
        if category_id != 1 {
            return Ok(Vec::new());
        }
        Ok(vec![FaqQuestion {
            faq_id: 10,
            question: "연차는 어떻게 신청하나요?".to_string(),
        }])
    }

    async fn answer(&self, faq_id: i64) -> dtalks_core::Result<Option<FaqAnswer>> {
        Ok((faq_id == 10).then(|| FaqAnswer {
            question: "연차는 어떻게 신청하나요?".to_string(),
            answer: "그룹웨어 근태 메뉴에서 신청합니다.".to_string(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(String),
    Blocks(BlockMessage),
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingSink {
    /// Everything except progress notices
    fn replies(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !matches!(s, Sent::Text(t) if t.starts_with("[SYSTEM]")))
            .cloned()
            .collect()
    }

    fn notices(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Text(t) if t.starts_with("[SYSTEM]") => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_text(&self, text: &str) -> dtalks_core::Result<()> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_blocks(&self, message: &BlockMessage) -> dtalks_core::Result<()> {
        self.sent.lock().unwrap().push(Sent::Blocks(message.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Setup {
    label: Label,
    confidence: f64,
    centroids: Vec<(Label, Vec<f32>)>,
    search: CannedSearch,
    blacklist: Vec<BlacklistEntry>,
    detected_language: &'static str,
    feedback_probability: f64,
}

impl Setup {
    fn new(label: Label, confidence: f64) -> Self {
        Self {
            label,
            confidence,
            centroids: Vec::new(),
            search: CannedSearch::default(),
            blacklist: Vec::new(),
            detected_language: "KO",
            feedback_probability: 0.0,
        }
    }
}

struct Harness {
    handler: ChatHandler,
    pipeline: Arc<Pipeline>,
    dialogs: Arc<DialogStateStore>,
    classifier: Arc<HybridIntentClassifier>,
    generator: Arc<ScriptedGenerator>,
    cache: Arc<FakeCache>,
    metrics: Arc<MetricsStore>,
    sink: RecordingSink,
    _dir: tempfile::TempDir,
}

fn harness(setup: Setup) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let centroids = Arc::new(CentroidStore::with_centroids(
        dir.path().join("centroids.json"),
        setup.centroids.into_iter().collect(),
    ));
    let model: Arc<dyn TextModel> = Arc::new(FixedModel {
        label: setup.label,
        confidence: setup.confidence,
    });
    let classifier = Arc::new(
        HybridIntentClassifier::new(Some(model), centroids).with_rules(KeywordRules::empty()),
    );

    let generator = Arc::new(ScriptedGenerator::default());
    let cache = Arc::new(FakeCache::default());
    let metrics = Arc::new(MetricsStore::new());
    let context = Arc::new(ConversationContext::new(
        Arc::new(MemoryContextStore::new()),
        generator.clone(),
        ContextSettings::default(),
    ));
    let sources = Arc::new(StrategySources::new(
        Arc::new(ConstEmbedder),
        Arc::new(setup.search),
        Arc::new(NoGrants),
        None,
        &RetrievalConfig::default(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        PipelineDeps {
            classifier: classifier.clone(),
            guardrail: Arc::new(Guardrail::new(setup.blacklist, None)),
            context,
            cache: cache.clone(),
            generator: generator.clone(),
            translator: Arc::new(TaggingTranslator {
                detected: setup.detected_language,
            }),
            metrics: metrics.clone(),
            sources,
        },
        PipelineSettings::default(),
    ));
    let dialogs = Arc::new(DialogStateStore::new(Duration::from_secs(3600)));
    let handler = ChatHandler::new(
        pipeline.clone(),
        dialogs.clone(),
        Arc::new(StaticFaq),
        HandlerSettings {
            feedback_probability: setup.feedback_probability,
            learning_rate: 0.1,
        },
    );

    Harness {
        handler,
        pipeline,
        dialogs,
        classifier,
        generator,
        cache,
        metrics,
        sink: RecordingSink::default(),
        _dir: dir,
    }
}

impl Harness {
    async fn send(&self, text: &str) {
        self.handler.handle(USER, text, &self.sink).await.unwrap();
    }

    /// Sum of a metric's series whose `label` equals `value`
    fn metric(&self, name: &str, label: &str, value: &str) -> f64 {
        self.metrics
            .samples()
            .iter()
            .filter(|s| s.name == name && s.label(label) == Some(value))
            .map(|s| s.value)
            .sum()
    }
}

fn text(s: &str) -> Sent {
    Sent::Text(s.to_string())
}

// ---------------------------------------------------------------------------
// Side channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_message() {
    let h = harness(Setup::new(Label::Smalltalk, 0.9));
    h.send("   ").await;
    assert_eq!(h.sink.replies(), vec![text(EMPTY_MESSAGE)]);
    assert!(h.generator.prompts().is_empty());
}

#[tokio::test]
async fn test_faq_drill_down_yields_three_replies() {
    let h = harness(Setup::new(Label::Smalltalk, 0.9));

    h.send("@FAQ").await;
    assert_eq!(
        h.dialogs.get(USER).await.unwrap().pending_mode,
        Some(DialogMode::FaqCategory)
    );
    h.send("1").await;
    assert_eq!(
        h.dialogs.get(USER).await.unwrap().pending_mode,
        Some(DialogMode::FaqQuestion)
    );
    h.send("10").await;

    let replies = h.sink.replies();
    assert_eq!(replies.len(), 3);
    assert!(replies.iter().all(|r| matches!(r, Sent::Blocks(_))));
    let Sent::Blocks(answer) = &replies[2] else {
        unreachable!()
    };
    assert_eq!(
        answer,
        &BlockMessage::faq_answer(&FaqAnswer {
            question: "연차는 어떻게 신청하나요?".to_string(),
            answer: "그룹웨어 근태 메뉴에서 신청합니다.".to_string(),
        })
    );
    assert_eq!(h.dialogs.get(USER).await.unwrap().pending_mode, None);
    assert!(h.generator.prompts().is_empty());
}

#[tokio::test]
async fn test_faq_invalid_selection_keeps_state() {
    let h = harness(Setup::new(Label::Smalltalk, 0.9));

    h.send("@faq").await;
    h.send("인사").await;
    assert_eq!(
        h.dialogs.get(USER).await.unwrap().pending_mode,
        Some(DialogMode::FaqCategory)
    );

    h.send("1").await;
    h.send("열 번").await;
    assert_eq!(
        h.dialogs.get(USER).await.unwrap().pending_mode,
        Some(DialogMode::FaqQuestion)
    );

    let replies = h.sink.replies();
    assert_eq!(replies[1], text(NUMBERS_ONLY));
    assert_eq!(replies[3], text(NUMBERS_ONLY));
    assert_eq!(replies.len(), 4);
}

#[tokio::test]
async fn test_exit_faq_mode() {
    let h = harness(Setup::new(Label::Smalltalk, 0.9));

    h.send("@FAQ").await;
    h.send("@나가기").await;
    assert_eq!(h.sink.replies().last(), Some(&text(FAQ_EXITED)));
    assert!(h.dialogs.get(USER).await.unwrap().is_neutral());

    // outside FAQ mode the exit command is not recognised
    h.send("@나가기").await;
    assert_eq!(h.sink.replies().last(), Some(&text(UNKNOWN_COMMAND)));
}

#[tokio::test]
async fn test_unknown_command() {
    let h = harness(Setup::new(Label::Smalltalk, 0.9));
    h.send("@도움말").await;
    assert_eq!(h.sink.replies(), vec![text(UNKNOWN_COMMAND)]);
}

#[tokio::test]
async fn test_like_applies_to_last_exchange() {
    let mut setup = Setup::new(Label::OrgChart, 1.0);
    setup.centroids = vec![(Label::OrgChart, vec![0.0, 0.0])];
    setup.feedback_probability = 1.0;
    let h = harness(setup);

    h.send("개발팀 누구 있어?").await;
    let replies = h.sink.replies();
    assert_eq!(replies[0], text(GENERATED));
    assert_eq!(replies[1], Sent::Blocks(BlockMessage::feedback_prompt()));
    let exchange = h.dialogs.get(USER).await.unwrap().last_exchange.unwrap();
    assert_eq!(exchange.query, "개발팀 누구 있어?");
    assert_eq!(exchange.label, Label::OrgChart);

    h.sink.clear();
    h.send("@좋아요").await;
    assert_eq!(h.sink.replies(), vec![text(FEEDBACK_THANKS)]);

    let centroid = h.classifier.centroids().get(&Label::OrgChart).unwrap();
    assert!((centroid[0] - 0.1).abs() < 1e-6);
    assert_eq!(centroid[1], 0.0);
    assert_eq!(
        h.metric("chatbot_user_feedback_total", "label_type", "__label__org_chart"),
        1.0
    );

    // the exchange is consumed
    h.sink.clear();
    h.send("@싫어요").await;
    assert_eq!(h.sink.replies(), vec![text(FEEDBACK_WITHOUT_EXCHANGE)]);
    assert!((h.classifier.centroids().get(&Label::OrgChart).unwrap()[0] - 0.1).abs() < 1e-6);
}

#[tokio::test]
async fn test_feedback_without_exchange() {
    let mut setup = Setup::new(Label::OrgChart, 1.0);
    setup.centroids = vec![(Label::OrgChart, vec![0.0, 0.0])];
    let h = harness(setup);

    h.send("@싫어요").await;
    assert_eq!(h.sink.replies(), vec![text(FEEDBACK_WITHOUT_EXCHANGE)]);
    assert_eq!(
        h.classifier.centroids().get(&Label::OrgChart).unwrap(),
        vec![0.0, 0.0]
    );
    assert_eq!(
        h.metric("chatbot_user_feedback_total", "label_type", "__label__org_chart"),
        0.0
    );
}

#[tokio::test]
async fn test_no_feedback_prompt_clears_exchange() {
    let h = harness(Setup::new(Label::OrgChart, 0.9));

    h.send("개발팀 누구 있어?").await;
    assert_eq!(h.sink.replies(), vec![text(GENERATED)]);
    assert!(h.dialogs.get(USER).await.unwrap().is_neutral());
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_confidence_at_threshold_asks_for_clarification() {
    let h = harness(Setup::new(Label::Other("misc".to_string()), 0.6));

    let reply = h.pipeline.run(USER, "그거 알려줘", &h.sink).await.unwrap();
    assert_eq!(reply.outcome, Outcome::Clarify);
    assert_eq!(reply.text, CLARIFY);
    assert!(h.generator.prompts().is_empty());
    assert_eq!(
        h.metric(
            "chatbot_total_response_time_seconds_count",
            "success_status",
            "failure"
        ),
        1.0
    );
}

#[tokio::test]
async fn test_confidence_above_threshold_is_answered() {
    let h = harness(Setup::new(Label::Other("misc".to_string()), 0.61));

    let reply = h.pipeline.run(USER, "그거 알려줘", &h.sink).await.unwrap();
    assert_eq!(reply.outcome, Outcome::Answered);
    assert_eq!(reply.text, GENERATED);
    // unrouted labels send the question as the prompt
    assert_eq!(h.generator.prompts(), vec!["그거 알려줘".to_string()]);
    assert_eq!(
        h.metric("chatbot_response_success_total", "label_type", "__label__misc"),
        1.0
    );
}

#[tokio::test]
async fn test_guardrail_block_records_metrics() {
    let mut setup = Setup::new(Label::Smalltalk, 0.9);
    setup.blacklist = vec![BlacklistEntry {
        keyword: "바보".to_string(),
        response: String::new(),
    }];
    let h = harness(setup);

    let reply = h.pipeline.run(USER, "너 바보야?", &h.sink).await.unwrap();
    assert_eq!(reply.outcome, Outcome::Blocked);
    assert_eq!(reply.text, DEFAULT_REFUSAL);
    assert!(reply.label.is_none());
    assert!(h.generator.prompts().is_empty());
    assert_eq!(h.cache.lookups.load(Ordering::SeqCst), 0);

    assert_eq!(
        h.metric("chatbot_response_success_total", "label_type", "guardrail_blocked"),
        1.0
    );
    assert_eq!(
        h.metric("chatbot_weekly_responses_total", "label_type", "guardrail"),
        1.0
    );
    assert_eq!(
        h.metric("chatbot_total_response_time_seconds_count", "label_type", "guardrail"),
        1.0
    );
}

#[tokio::test]
async fn test_cache_hit_skips_generation() {
    let mut setup = Setup::new(Label::FormRequest, 0.9);
    setup.feedback_probability = 0.0;
    let h = harness(setup);
    let link = LinkData {
        title: "휴가 신청서".to_string(),
        url: "https://files.example.com/leave.docx".to_string(),
    };
    *h.cache.hit.lock().unwrap() = Some(CachedAnswer {
        answer: "휴가 신청서 양식입니다.".to_string(),
        similarity: 0.93,
        matched_template: Some(link.clone()),
    });

    h.send("휴가 신청서 주세요").await;

    assert_eq!(
        h.sink.replies(),
        vec![
            text("휴가 신청서 양식입니다."),
            Sent::Blocks(BlockMessage::form_link(&link)),
        ]
    );
    assert!(h.generator.prompts().is_empty());
    assert_eq!(
        h.metric("chatbot_response_success_total", "label_type", "__label__form_request"),
        1.0
    );
    assert_eq!(
        h.metric("chatbot_prompt_template_usage_total", "label_type", "__label__form_request"),
        0.0
    );
}

#[tokio::test]
async fn test_cache_miss_stores_answer() {
    let h = harness(Setup::new(Label::OrgChart, 0.9));

    let reply = h.pipeline.run(USER, "인사팀 담당자", &h.sink).await.unwrap();
    assert!(reply.is_answered());
    assert_eq!(h.cache.lookups.load(Ordering::SeqCst), 1);

    for _ in 0..20 {
        if !h.cache.stored.lock().unwrap().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(*h.cache.stored.lock().unwrap(), vec!["인사팀 담당자".to_string()]);
    assert_eq!(
        h.metric("chatbot_prompt_template_usage_total", "template_type", "org_chart"),
        1.0
    );
}

#[tokio::test]
async fn test_smalltalk_bypasses_cache() {
    let h = harness(Setup::new(Label::Smalltalk, 0.9));

    let reply = h.pipeline.run(USER, "점심 뭐 먹지", &h.sink).await.unwrap();
    assert!(reply.is_answered());
    assert_eq!(h.cache.lookups.load(Ordering::SeqCst), 0);
    tokio::task::yield_now().await;
    assert!(h.cache.stored.lock().unwrap().is_empty());

    let prompts = h.generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("점심 뭐 먹지"));
    assert_eq!(
        h.metric("chatbot_prompt_template_usage_total", "template_type", "smalltalk"),
        1.0
    );
    assert_eq!(h.sink.notices().len(), 2);
}

#[tokio::test]
async fn test_faq_answer_is_returned_without_generation() {
    let mut setup = Setup::new(Label::InternalInfo, 0.9);
    setup.search = CannedSearch::default().with(
        "faq-vectors",
        0.91,
        json!({"question": "연차 신청 방법", "answer": "그룹웨어에서 신청하세요.", "category": "인사"}),
    );
    let h = harness(setup);

    let reply = h.pipeline.run(USER, "연차 어떻게 써요", &h.sink).await.unwrap();
    assert_eq!(reply.outcome, Outcome::Answered);
    assert_eq!(reply.text, "그룹웨어에서 신청하세요.");
    assert!(h.generator.prompts().is_empty());
    assert_eq!(
        h.metric("chatbot_prompt_template_usage_total", "template_type", "faq"),
        1.0
    );
}

#[tokio::test]
async fn test_faq_near_miss_uses_document_prompt() {
    let mut setup = Setup::new(Label::InternalInfo, 0.9);
    setup.search = CannedSearch::default().with(
        "faq-vectors",
        0.7,
        json!({"question": "연차 신청 방법", "answer": "그룹웨어에서 신청하세요."}),
    );
    let h = harness(setup);

    let reply = h.pipeline.run(USER, "재택근무 규정", &h.sink).await.unwrap();
    assert!(reply.is_answered());
    // the user has no granted documents
    assert_eq!(
        h.generator.prompts(),
        vec![dtalks_conversation::prompts::NO_DOCUMENT_PROMPT.to_string()]
    );
    assert_eq!(
        h.metric("chatbot_prompt_template_usage_total", "template_type", "internal_rag"),
        1.0
    );
}

#[tokio::test]
async fn test_internal_info_without_match() {
    let h = harness(Setup::new(Label::InternalInfo, 0.9));

    let reply = h.pipeline.run(USER, "사내 주차 규정", &h.sink).await.unwrap();
    assert_eq!(reply.outcome, Outcome::NotFound);
    assert_eq!(reply.text, NO_MATCHING_INFO);
    assert!(h.generator.prompts().is_empty());
    assert_eq!(
        h.metric("chatbot_response_failure_total", "error_type", "no_match"),
        1.0
    );
}

#[tokio::test]
async fn test_generation_failure_is_counted() {
    let h = harness(Setup::new(Label::OrgChart, 0.9));
    h.generator.fail.store(true, Ordering::SeqCst);

    let result = h.pipeline.run(USER, "개발팀 누구 있어?", &h.sink).await;
    assert!(result.is_err());
    assert_eq!(
        h.metric("chatbot_response_failure_total", "error_type", "system_error"),
        1.0
    );
    assert_eq!(
        h.metric(
            "chatbot_total_response_time_seconds_count",
            "success_status",
            "failure"
        ),
        1.0
    );
}

#[tokio::test]
async fn test_foreign_user_gets_translated_replies() {
    let mut setup = Setup::new(Label::Smalltalk, 0.9);
    setup.detected_language = "EN";
    let h = harness(setup);

    let reply = h.pipeline.run(USER, "what's for lunch", &h.sink).await.unwrap();
    assert_eq!(reply.text, format!("[EN-US] {}", GENERATED));
    assert_eq!(
        h.sink.notices()[0],
        "[SYSTEM] [EN-US] 대화의 주제를 확인하는 중이에요..."
    );
    assert_eq!(
        h.metric("chatbot_daily_conversations_total", "language", "EN-US"),
        1.0
    );
}

#[tokio::test]
async fn test_related_history_replaces_label_prompt() {
    struct RelatedGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for RelatedGenerator {
        async fn generate(&self, prompt: &str) -> dtalks_core::Result<String> {
            if prompt.starts_with("Analyze the relationship") {
                return Ok("```json\n[0]\n```".to_string());
            }
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(GENERATED.to_string())
        }
    }

    let h = harness(Setup::new(Label::Other("misc".to_string()), 0.2));
    let generator = Arc::new(RelatedGenerator {
        prompts: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryContextStore::new());
    let context = Arc::new(ConversationContext::new(
        store,
        generator.clone(),
        ContextSettings::default(),
    ));
    context
        .add_to_history(USER, "개발팀 팀장이 누구야?", "김철수 팀장입니다.")
        .await;

    let pipeline = Pipeline::new(
        PipelineDeps {
            classifier: h.classifier.clone(),
            guardrail: Arc::new(Guardrail::new(Vec::new(), None)),
            context,
            cache: h.cache.clone(),
            generator: generator.clone(),
            translator: Arc::new(TaggingTranslator { detected: "KO" }),
            metrics: h.metrics.clone(),
            sources: Arc::new(StrategySources::new(
                Arc::new(ConstEmbedder),
                Arc::new(CannedSearch::default()),
                Arc::new(NoGrants),
                None,
                &RetrievalConfig::default(),
            )),
        },
        PipelineSettings::default(),
    );

    // low confidence is fine when related turns exist
    let reply = pipeline.run(USER, "그 사람 연락처는?", &h.sink).await.unwrap();
    assert_eq!(reply.outcome, Outcome::Answered);
    let prompts = generator.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("=== Related Previous Conversations (For Reference) ==="));
    assert!(prompts[0].contains("김철수 팀장입니다."));
}

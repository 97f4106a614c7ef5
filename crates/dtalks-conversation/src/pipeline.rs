//! Per-message orchestration
//!
//! Translate in, guardrail, context recall, classification, cache lookup,
//! strategy dispatch, generation, and translate out. Every exit path leaves
//! latency and outcome metrics behind.

use dtalks_core::{
    ClassificationResult, ClassifierConfig, Generator, Label, Language, LinkData, MessageSink,
    ResponseCache, Translator,
};
use dtalks_infra::{MetricsStore, TemplateKind};
use dtalks_nlp::HybridIntentClassifier;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::context::{build_context_prompt, ConversationContext};
use crate::error::Result;
use crate::guardrail::{Guardrail, GuardrailVerdict};
use crate::prompts::{FaqLookup, StrategySources};

pub const CLARIFY: &str = "좀 더 구체적으로 말씀해 주시겠어요?";
pub const NO_MATCHING_INFO: &str = "관련된 정보를 찾을 수 없어요.";

const NOTICE_TOPIC: &str = "대화의 주제를 확인하는 중이에요";
const NOTICE_CACHE: &str = "캐시를 확인하는 중이에요";
const NOTICE_GENERATE: &str = "답변을 생성하는 중이에요";

const GUARDRAIL_LABEL: &str = "guardrail_blocked";
const GUARDRAIL_WEEKLY: &str = "guardrail";
const SYSTEM_ERROR: &str = "system_error";
const NO_MATCH_ERROR: &str = "no_match";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Candidates considered by the hybrid classifier
    pub top_k: usize,
    /// Confidence at or below which a question without context is sent back
    pub low_confidence_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&ClassifierConfig::default())
    }
}

impl From<&ClassifierConfig> for PipelineSettings {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            top_k: config.top_k.max(1),
            low_confidence_threshold: config.low_confidence_threshold,
        }
    }
}

/// Collaborators the pipeline drives
pub struct PipelineDeps {
    pub classifier: Arc<HybridIntentClassifier>,
    pub guardrail: Arc<Guardrail>,
    pub context: Arc<ConversationContext>,
    pub cache: Arc<dyn ResponseCache>,
    pub generator: Arc<dyn Generator>,
    pub translator: Arc<dyn Translator>,
    pub metrics: Arc<MetricsStore>,
    pub sources: Arc<StrategySources>,
}

/// How a message left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Answered, either generated, from the FAQ or from the cache
    Answered,
    Blocked,
    /// Sent back for a more specific question
    Clarify,
    NotFound,
}

/// Reply text plus what the handler needs to follow up on
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReply {
    pub text: String,
    pub link: Option<LinkData>,
    pub query: String,
    pub label: Option<Label>,
    pub outcome: Outcome,
}

impl PipelineReply {
    pub fn is_answered(&self) -> bool {
        self.outcome == Outcome::Answered
    }
}

enum Strategy {
    Prompt(String),
    Direct(String),
    NotFound,
}

pub struct Pipeline {
    classifier: Arc<HybridIntentClassifier>,
    guardrail: Arc<Guardrail>,
    context: Arc<ConversationContext>,
    cache: Arc<dyn ResponseCache>,
    generator: Arc<dyn Generator>,
    translator: Arc<dyn Translator>,
    metrics: Arc<MetricsStore>,
    sources: Arc<StrategySources>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            classifier: deps.classifier,
            guardrail: deps.guardrail,
            context: deps.context,
            cache: deps.cache,
            generator: deps.generator,
            translator: deps.translator,
            metrics: deps.metrics,
            sources: deps.sources,
            settings,
        }
    }

    pub fn classifier(&self) -> &Arc<HybridIntentClassifier> {
        &self.classifier
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    /// Run one message through the pipeline, posting progress notices to `sink`.
    ///
    /// Errors reaching this boundary are counted as `system_error` before
    /// they are returned.
    #[instrument(skip(self, text, sink))]
    pub async fn run(&self, user_id: &str, text: &str, sink: &dyn MessageSink) -> Result<PipelineReply> {
        let started = Instant::now();

        let (query, language) = self.translate_in(text).await;
        self.metrics.record_conversation(language.as_str());
        self.notice(sink, NOTICE_TOPIC, &language).await;

        if let GuardrailVerdict::Blocked(refusal) = self.guardrail.check(&query).await {
            self.metrics.record_success(GUARDRAIL_LABEL, 1.0);
            self.metrics.record_weekly(GUARDRAIL_WEEKLY);
            self.metrics
                .record_latency(GUARDRAIL_WEEKLY, started.elapsed().as_secs_f64(), true);
            return Ok(PipelineReply {
                text: self.translate_out(&refusal, &language).await,
                link: None,
                query,
                label: None,
                outcome: Outcome::Blocked,
            });
        }

        let related = self.context.find_related(user_id, &query).await;
        let classification = self.classifier.classify(&query, self.settings.top_k);
        let label = classification.label.clone();
        let tag = label.tag();
        info!(label = %label, confidence = classification.confidence, related = related.len(), "Classified message");

        if classification.confidence <= self.settings.low_confidence_threshold && related.is_empty() {
            self.metrics
                .record_latency(&tag, started.elapsed().as_secs_f64(), false);
            self.context.add_to_history(user_id, &query, CLARIFY).await;
            return Ok(PipelineReply {
                text: self.translate_out(CLARIFY, &language).await,
                link: None,
                query,
                label: Some(label),
                outcome: Outcome::Clarify,
            });
        }

        let result = self
            .answer(user_id, &query, &language, &classification, &related, started, sink)
            .await;
        if let Err(e) = &result {
            error!(label = %label, error = %e, "Pipeline failed");
            self.metrics.record_failure(SYSTEM_ERROR, &tag);
            self.metrics.record_weekly(&tag);
            self.metrics
                .record_latency(&tag, started.elapsed().as_secs_f64(), false);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn answer(
        &self,
        user_id: &str,
        query: &str,
        language: &Language,
        classification: &ClassificationResult,
        related: &[dtalks_core::ConversationTurn],
        started: Instant,
        sink: &dyn MessageSink,
    ) -> Result<PipelineReply> {
        let label = &classification.label;
        let tag = label.tag();

        if !label.is_smalltalk() {
            self.notice(sink, NOTICE_CACHE, language).await;
            match self.cache.lookup(query).await {
                Ok(Some(hit)) => {
                    info!(similarity = hit.similarity, "Answer served from cache");
                    let text = self.translate_out(&hit.answer, language).await;
                    self.record_answered(&tag, classification.confidence, started);
                    return Ok(PipelineReply {
                        text,
                        link: hit.matched_template,
                        query: query.to_string(),
                        label: Some(label.clone()),
                        outcome: Outcome::Answered,
                    });
                }
                Ok(None) => debug!("Cache miss"),
                Err(e) => warn!(error = %e, "Cache lookup failed"),
            }
        }

        self.notice(sink, NOTICE_GENERATE, language).await;

        let mut link = None;
        let strategy = if !related.is_empty() {
            Strategy::Prompt(build_context_prompt(query, related))
        } else {
            match label {
                Label::Smalltalk => {
                    self.metrics.record_template(TemplateKind::Smalltalk, &tag);
                    Strategy::Prompt(self.sources.smalltalk.build(query).await)
                }
                Label::OrgChart => {
                    self.metrics.record_template(TemplateKind::OrgChart, &tag);
                    Strategy::Prompt(self.sources.members.build(query).await)
                }
                Label::FormRequest => {
                    self.metrics.record_template(TemplateKind::FormRequest, &tag);
                    let (prompt, matched) = self.sources.templates.build(query).await;
                    link = matched;
                    Strategy::Prompt(prompt)
                }
                Label::InternalInfo => self.internal_strategy(query, user_id, &tag).await,
                Label::Other(_) => Strategy::Prompt(query.to_string()),
            }
        };

        let response = match strategy {
            Strategy::Prompt(prompt) => self.generator.generate(&prompt).await?,
            Strategy::Direct(answer) => answer,
            Strategy::NotFound => {
                self.metrics.record_failure(NO_MATCH_ERROR, &tag);
                self.metrics.record_weekly(&tag);
                self.metrics
                    .record_latency(&tag, started.elapsed().as_secs_f64(), false);
                return Ok(PipelineReply {
                    text: self.translate_out(NO_MATCHING_INFO, language).await,
                    link: None,
                    query: query.to_string(),
                    label: Some(label.clone()),
                    outcome: Outcome::NotFound,
                });
            }
        };

        if !label.is_smalltalk() {
            self.store_in_background(query, &response, link.clone());
        }
        self.context.add_to_history(user_id, query, &response).await;

        let text = self.translate_out(&response, language).await;
        self.record_answered(&tag, classification.confidence, started);

        Ok(PipelineReply {
            text,
            link,
            query: query.to_string(),
            label: Some(label.clone()),
            outcome: Outcome::Answered,
        })
    }

    /// FAQ first; a near miss falls back to document search
    async fn internal_strategy(&self, query: &str, user_id: &str, tag: &str) -> Strategy {
        match self.sources.faq.find(query).await {
            FaqLookup::Success {
                answer,
                score,
                matched_question,
                ..
            } => {
                debug!(score, matched_question = %matched_question, "Answered from FAQ");
                self.metrics.record_template(TemplateKind::Faq, tag);
                Strategy::Direct(answer)
            }
            FaqLookup::FallbackToRag { best_score, .. } => {
                debug!(best_score, "FAQ near miss, searching documents");
                self.metrics.record_template(TemplateKind::InternalRag, tag);
                Strategy::Prompt(self.sources.documents.build(query, user_id).await)
            }
            other => {
                warn!(lookup = ?other, "No internal information found");
                Strategy::NotFound
            }
        }
    }

    fn record_answered(&self, tag: &str, confidence: f64, started: Instant) {
        self.metrics
            .record_latency(tag, started.elapsed().as_secs_f64(), true);
        self.metrics.record_success(tag, confidence);
        self.metrics.record_weekly(tag);
    }

    fn store_in_background(&self, query: &str, response: &str, link: Option<LinkData>) {
        let cache = Arc::clone(&self.cache);
        let query = query.to_string();
        let response = response.to_string();
        tokio::spawn(async move {
            match cache.store(&query, &response, link.as_ref()).await {
                Ok(id) => debug!(id = %id, "Answer cached"),
                Err(e) => warn!(error = %e, "Failed to cache answer"),
            }
        });
    }

    async fn translate_in(&self, text: &str) -> (String, Language) {
        match self.translator.translate(text, Language::DEFAULT).await {
            Ok(translation) => (
                translation.text,
                Language::from_detected(&translation.detected_language),
            ),
            Err(e) => {
                warn!(error = %e, "Inbound translation failed, using original text");
                (text.to_string(), Language::korean())
            }
        }
    }

    /// Render `text` in the user's language, falling back to the original
    pub async fn translate_out(&self, text: &str, language: &Language) -> String {
        if language.is_default() {
            return text.to_string();
        }
        match self.translator.translate(text, language.as_str()).await {
            Ok(translation) => translation.text,
            Err(e) => {
                warn!(error = %e, language = %language, "Outbound translation failed");
                text.to_string()
            }
        }
    }

    async fn notice(&self, sink: &dyn MessageSink, text: &str, language: &Language) {
        let text = format!("[SYSTEM] {}...", self.translate_out(text, language).await);
        if let Err(e) = sink.send_text(&text).await {
            warn!(error = %e, "Failed to send progress notice");
        }
    }
}

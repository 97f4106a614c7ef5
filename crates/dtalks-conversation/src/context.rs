//! Rolling per-user conversation memory
//!
//! Each user keeps a short history of `(query, response)` pairs, newest first.
//! Long responses are summarised before they are stored. When a new question
//! arrives the generator is asked which of the remembered turns relate to it,
//! and the selected turns are folded into the prompt.

use async_trait::async_trait;
use dtalks_core::{ContextConfig, ContextStore, ConversationTurn, Generator};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

lazy_static! {
    static ref FENCED_ARRAY: Regex = Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").unwrap();
}

/// Limits applied to the rolling history
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub max_turns: usize,
    pub ttl: Duration,
    /// Responses longer than this many characters are summarised
    pub summary_threshold: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextSettings {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_turns: config.max_turns.max(1),
            ttl: config.ttl(),
            summary_threshold: config.summary_threshold,
        }
    }
}

pub struct ConversationContext {
    store: Arc<dyn ContextStore>,
    generator: Arc<dyn Generator>,
    settings: ContextSettings,
}

impl ConversationContext {
    pub fn new(
        store: Arc<dyn ContextStore>,
        generator: Arc<dyn Generator>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Remember an exchange. Returns false when the store rejected it.
    #[instrument(skip(self, query, response))]
    pub async fn add_to_history(&self, user_id: &str, query: &str, response: &str) -> bool {
        let stored = self.summarize(response).await;
        let turn = ConversationTurn::new(query, stored);

        match self
            .store
            .push(user_id, turn, self.settings.max_turns, self.settings.ttl)
            .await
        {
            Ok(()) => {
                debug!("Stored conversation turn");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to store conversation turn");
                false
            }
        }
    }

    async fn summarize(&self, response: &str) -> String {
        let length = response.chars().count();
        if length <= self.settings.summary_threshold {
            return response.to_string();
        }

        let prompt = format!(
            "Summarize the following response in 2-3 sentences, keeping only the key information:\n\
             Response: {}\n\
             Summary:",
            response
        );
        match self.generator.generate(&prompt).await {
            Ok(summary) => {
                info!(from = length, to = summary.chars().count(), "Summarised response");
                summary
            }
            Err(e) => {
                warn!(error = %e, "Summary failed, keeping original response");
                response.to_string()
            }
        }
    }

    /// Turns from the user's history that relate to `query`.
    ///
    /// Any failure along the way yields an empty list.
    #[instrument(skip(self, query))]
    pub async fn find_related(&self, user_id: &str, query: &str) -> Vec<ConversationTurn> {
        let history = match self.store.recent(user_id, self.settings.max_turns).await {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "Could not read conversation history");
                return Vec::new();
            }
        };
        if history.is_empty() {
            debug!("No previous conversation");
            return Vec::new();
        }

        let reply = match self.generator.generate(&relevance_prompt(query, &history)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Relevance check failed");
                return Vec::new();
            }
        };

        let related: Vec<ConversationTurn> = parse_indices(&reply, history.len())
            .into_iter()
            .map(|i| history[i].clone())
            .collect();
        debug!(related = related.len(), "Related turns selected");
        related
    }
}

fn relevance_prompt(query: &str, history: &[ConversationTurn]) -> String {
    let listing = serde_json::to_string_pretty(history).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"Analyze the relationship between the current question and previous conversations.

Current question: "{query}"

Previous conversations:
{listing}

Task: Identify which previous conversations are contextually related to the current question.
Output: Return ONLY a JSON array of indices for related conversations.
- Format: [0, 2, 4]
- If no conversations are related: []
- Do not include any explanation or additional text."#
    )
}

/// Indices named by a relevance reply, restricted to `0..len`.
///
/// Accepts a bare array or one inside a fenced code block; anything else
/// means nothing is related. Non-integer entries are dropped.
pub fn parse_indices(reply: &str, len: usize) -> Vec<usize> {
    let mut text = reply.trim();
    if let Some(caps) = FENCED_ARRAY.captures(text) {
        if let Some(inner) = caps.get(1) {
            text = inner.as_str().trim();
        }
    }

    if !(text.starts_with('[') && text.ends_with(']')) {
        warn!(reply = %text, "Relevance reply is not an array");
        return Vec::new();
    }

    let values: Vec<serde_json::Value> = match serde_json::from_str(text) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "Relevance reply is not valid JSON");
            return Vec::new();
        }
    };

    values
        .iter()
        .filter_map(|v| v.as_u64())
        .map(|i| i as usize)
        .filter(|&i| i < len)
        .collect()
}

/// Prompt that carries the related turns ahead of the current question
pub fn build_context_prompt(query: &str, related: &[ConversationTurn]) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !related.is_empty() {
        parts.push("=== Related Previous Conversations (For Reference) ===".to_string());
        parts.push(
            "The following are summaries of previous conversations. Use them only to extract key context or information.\n"
                .to_string(),
        );
        for (idx, turn) in related.iter().enumerate() {
            parts.push(format!("\n[Previous Conversation {}]", idx + 1));
            parts.push(format!("User asked: {}", turn.query));
            parts.push(format!("Assistant's response: {}", turn.response));
            parts.push(String::new());
        }
        parts.push(
            "Use the above conversations as a reference to answer the following question.\n"
                .to_string(),
        );
    }

    parts.push(format!("Current question: {}", query));
    parts.join("\n")
}

struct StoredTurn {
    turn: ConversationTurn,
    expires_at: Instant,
}

/// Process-local history used when no Redis URL is configured.
///
/// Unlike the Redis list, every turn expires on its own schedule.
#[derive(Default)]
pub struct MemoryContextStore {
    histories: RwLock<HashMap<String, VecDeque<StoredTurn>>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired turns and empty histories
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut histories = self.histories.write().await;
        let mut removed = 0;
        for turns in histories.values_mut() {
            let before = turns.len();
            turns.retain(|t| t.expires_at > now);
            removed += before - turns.len();
        }
        histories.retain(|_, turns| !turns.is_empty());
        removed
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn push(
        &self,
        user_id: &str,
        turn: ConversationTurn,
        max_turns: usize,
        ttl: Duration,
    ) -> dtalks_core::Result<()> {
        let now = Instant::now();
        let mut histories = self.histories.write().await;
        let turns = histories.entry(user_id.to_string()).or_default();
        turns.retain(|t| t.expires_at > now);
        turns.push_front(StoredTurn {
            turn,
            expires_at: now + ttl,
        });
        turns.truncate(max_turns.max(1));
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        max_turns: usize,
    ) -> dtalks_core::Result<Vec<ConversationTurn>> {
        let now = Instant::now();
        let histories = self.histories.read().await;
        Ok(histories
            .get(user_id)
            .map(|turns| {
                turns
                    .iter()
                    .filter(|t| t.expires_at > now)
                    .take(max_turns)
                    .map(|t| t.turn.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtalks_core::AppError;
    use std::sync::Mutex;

    /// Replays canned replies and records the prompts it saw
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<dtalks_core::Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<dtalks_core::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> dtalks_core::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::external("llm", "no scripted reply")))
        }
    }

    fn context(generator: Arc<ScriptedGenerator>) -> (Arc<MemoryContextStore>, ConversationContext) {
        let store = Arc::new(MemoryContextStore::new());
        let ctx = ConversationContext::new(
            store.clone(),
            generator,
            ContextSettings {
                max_turns: 3,
                ttl: Duration::from_secs(60),
                summary_threshold: 20,
            },
        );
        (store, ctx)
    }

    #[test]
    fn test_parse_indices() {
        assert_eq!(parse_indices("[0, 2]", 3), vec![0, 2]);
        assert_eq!(parse_indices("```json\n[1]\n```", 3), vec![1]);
        assert_eq!(parse_indices("[0, 5, -1, \"2\", 1.5, 2]", 3), vec![0, 2]);
        assert!(parse_indices("Related: [0]", 3).is_empty());
        assert!(parse_indices("[0, oops]", 3).is_empty());
        assert!(parse_indices("[]", 3).is_empty());
    }

    #[test]
    fn test_build_context_prompt() {
        let plain = build_context_prompt("연차 며칠?", &[]);
        assert_eq!(plain, "Current question: 연차 며칠?");

        let turn = ConversationTurn::new("휴가 규정 알려줘", "연차는 15일입니다.");
        let prompt = build_context_prompt("반차도 돼?", &[turn]);
        assert!(prompt.starts_with("=== Related Previous Conversations (For Reference) ==="));
        assert!(prompt.contains("[Previous Conversation 1]"));
        assert!(prompt.contains("User asked: 휴가 규정 알려줘"));
        assert!(prompt.ends_with("Current question: 반차도 돼?"));
    }

    #[tokio::test]
    async fn test_long_responses_are_summarised() {
        let generator = ScriptedGenerator::new(vec![Ok("요약".to_string())]);
        let (store, ctx) = context(generator.clone());

        assert!(ctx.add_to_history("u1", "짧은 질문", "짧은 답").await);
        assert!(ctx.add_to_history("u1", "긴 질문", &"가".repeat(21)).await);

        let turns = store.recent("u1", 5).await.unwrap();
        assert_eq!(turns[0].response, "요약");
        assert_eq!(turns[1].response, "짧은 답");
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_summary_keeps_original() {
        let generator = ScriptedGenerator::new(vec![]);
        let (store, ctx) = context(generator);
        let long = "나".repeat(30);

        ctx.add_to_history("u1", "q", &long).await;
        assert_eq!(store.recent("u1", 1).await.unwrap()[0].response, long);
    }

    #[tokio::test]
    async fn test_find_related_selects_indices() {
        let generator = ScriptedGenerator::new(vec![Ok("[1]".to_string())]);
        let (store, ctx) = context(generator);
        store
            .push("u1", ConversationTurn::new("a", "A"), 3, Duration::from_secs(60))
            .await
            .unwrap();
        store
            .push("u1", ConversationTurn::new("b", "B"), 3, Duration::from_secs(60))
            .await
            .unwrap();

        let related = ctx.find_related("u1", "c").await;
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].query, "a");
    }

    #[tokio::test]
    async fn test_find_related_fails_open() {
        let generator = ScriptedGenerator::new(vec![Ok("I think turn zero".to_string())]);
        let (store, ctx) = context(generator.clone());
        assert!(ctx.find_related("u1", "c").await.is_empty());
        assert!(generator.prompts.lock().unwrap().is_empty());

        store
            .push("u1", ConversationTurn::new("a", "A"), 3, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(ctx.find_related("u1", "c").await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_bounds_and_expiry() {
        let store = MemoryContextStore::new();
        for q in ["1", "2", "3", "4"] {
            store
                .push("u1", ConversationTurn::new(q, q), 3, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let turns = store.recent("u1", 5).await.unwrap();
        let queries: Vec<&str> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["4", "3", "2"]);

        store
            .push("u2", ConversationTurn::new("x", "x"), 3, Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(store.recent("u2", 5).await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await, 1);
    }
}

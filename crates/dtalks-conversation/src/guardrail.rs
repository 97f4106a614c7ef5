//! Two-stage safety filter
//!
//! Stage one is a curated keyword blacklist with a canned response per
//! keyword. Only input that passes it is sent to the moderation model.

use dtalks_core::{ModerationVerdict, SafetyModerator};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::Result;

pub const DEFAULT_REFUSAL: &str = "부적절한 표현이 감지되었습니다. 다른 표현을 사용해주세요.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlacklistEntry {
    pub keyword: String,
    #[serde(default)]
    pub response: String,
}

/// Outcome of screening a message
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    Allowed,
    /// Refusal to send back instead of an answer
    Blocked(String),
}

impl GuardrailVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

pub struct Guardrail {
    blacklist: Vec<BlacklistEntry>,
    moderator: Option<Arc<dyn SafetyModerator>>,
}

impl Guardrail {
    pub fn new(blacklist: Vec<BlacklistEntry>, moderator: Option<Arc<dyn SafetyModerator>>) -> Self {
        let blacklist = blacklist
            .into_iter()
            .map(|e| BlacklistEntry {
                keyword: e.keyword.trim().to_string(),
                response: e.response.trim().to_string(),
            })
            .filter(|e| !e.keyword.is_empty())
            .collect();
        Self {
            blacklist,
            moderator,
        }
    }

    /// Load the blacklist from a JSON array of `{keyword, response}`
    pub async fn load_blacklist(path: impl AsRef<Path>) -> Result<Vec<BlacklistEntry>> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let entries: Vec<BlacklistEntry> = serde_json::from_str(&raw)?;
        info!(keywords = entries.len(), "Loaded guardrail blacklist");
        Ok(entries)
    }

    /// Build from a blacklist file, running without one if it cannot be read
    pub async fn from_file(path: impl AsRef<Path>, moderator: Option<Arc<dyn SafetyModerator>>) -> Self {
        let blacklist = match Self::load_blacklist(path.as_ref()).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "Blacklist unavailable, keyword stage disabled");
                Vec::new()
            }
        };
        if moderator.is_none() {
            warn!("No moderation model configured, second stage disabled");
        }
        Self::new(blacklist, moderator)
    }

    pub fn keyword_count(&self) -> usize {
        self.blacklist.len()
    }

    /// First stage: substring match against the blacklist
    pub fn check_keywords(&self, text: &str) -> Option<String> {
        self.blacklist
            .iter()
            .find(|e| text.contains(e.keyword.as_str()))
            .map(|e| {
                if e.response.is_empty() {
                    DEFAULT_REFUSAL.to_string()
                } else {
                    e.response.clone()
                }
            })
    }

    /// Run both stages. A moderation failure lets the message through.
    #[instrument(skip(self, text))]
    pub async fn check(&self, text: &str) -> GuardrailVerdict {
        if let Some(response) = self.check_keywords(text) {
            info!("Blocked by keyword blacklist");
            return GuardrailVerdict::Blocked(response);
        }

        let Some(moderator) = &self.moderator else {
            return GuardrailVerdict::Allowed;
        };

        match moderator.moderate(text).await {
            Ok(ModerationVerdict::Safe) => GuardrailVerdict::Allowed,
            Ok(ModerationVerdict::Unsafe { categories }) => {
                info!(categories = %categories, "Blocked by moderation model");
                GuardrailVerdict::Blocked(format!(
                    "LLM 필터링: 부적절한 표현이 감지되었습니다. (유형: {})",
                    categories
                ))
            }
            Err(e) => {
                warn!(error = %e, "Moderation call failed, allowing message");
                GuardrailVerdict::Allowed
            }
        }
    }
}

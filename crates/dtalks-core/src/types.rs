use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Prefix carried by every classifier tag, e.g. `__label__smalltalk`.
pub const LABEL_PREFIX: &str = "__label__";

/// Intent label produced by the classifier.
///
/// The four routed labels have their own variants; anything else the model
/// was trained on is kept verbatim in [`Label::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Smalltalk,
    OrgChart,
    FormRequest,
    InternalInfo,
    Other(String),
}

impl Label {
    /// Parse a tag with or without the `__label__` prefix
    pub fn from_tag(tag: &str) -> Self {
        let name = tag.trim();
        let name = name.strip_prefix(LABEL_PREFIX).unwrap_or(name);
        match name {
            "smalltalk" => Self::Smalltalk,
            "org_chart" => Self::OrgChart,
            "form_request" => Self::FormRequest,
            "internal_info" => Self::InternalInfo,
            other => Self::Other(other.to_string()),
        }
    }

    /// Bare name without the prefix
    pub fn name(&self) -> &str {
        match self {
            Self::Smalltalk => "smalltalk",
            Self::OrgChart => "org_chart",
            Self::FormRequest => "form_request",
            Self::InternalInfo => "internal_info",
            Self::Other(name) => name,
        }
    }

    /// Full tag, e.g. `__label__org_chart`
    pub fn tag(&self) -> String {
        format!("{}{}", LABEL_PREFIX, self.name())
    }

    pub fn is_smalltalk(&self) -> bool {
        matches!(self, Self::Smalltalk)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", LABEL_PREFIX, self.name())
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// Output of a classification call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    /// Confidence in `[0, 1]`; distance-adjusted when centroids were used
    pub confidence: f64,
}

impl ClassificationResult {
    pub fn new(label: Label, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Language code as reported by the translation service (`KO`, `EN-US`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Language(String);

impl Language {
    /// Working language of the bot's canned replies
    pub const DEFAULT: &'static str = "KO";

    pub fn korean() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Normalise a detected source language into a usable target code.
    /// Bare `EN` is not a valid translation target, so it maps to `EN-US`.
    pub fn from_detected(code: &str) -> Self {
        let code = code.trim().to_uppercase();
        match code.as_str() {
            "" => Self::korean(),
            "EN" => Self("EN-US".to_string()),
            _ => Self(code),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::korean()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remembered exchange in a user's rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    /// Possibly a summary of the original reply
    pub response: String,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            query: query.into(),
            response: response.into(),
        }
    }
}

/// Envelope of every frame received on the chat socket
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Author of an inbound message
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// Payload of a `message` event
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub user: Sender,
}

impl InboundMessage {
    /// Stable string key for the author; numeric ids are rendered as text.
    pub fn user_key(&self) -> String {
        match &self.user_id {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => "default_user".to_string(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.user.display_name.as_deref().unwrap_or("Unknown")
    }

    /// Trimmed text, `None` when absent or blank
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// A template or document link attached to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkData {
    pub title: String,
    pub url: String,
}

/// FAQ category row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqCategory {
    pub category_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// FAQ question row within a category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqQuestion {
    pub faq_id: i64,
    pub question: String,
}

/// Question and answer pair for a single FAQ entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqAnswer {
    pub question: String,
    pub answer: String,
}

/// File registration request received from the admin backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub original_file_name: String,
    pub description: String,
    pub file_type: String,
    pub file_url: String,
}

/// File kind derived from the URL extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Audio,
    Pdf,
    Image,
    Excel,
    Csv,
    Word,
}

impl FileKind {
    /// Detect the kind of file behind a URL; `None` for unsupported types
    pub fn detect(url: &str) -> Option<Self> {
        let lower = url.to_lowercase();
        let ext = lower.rsplit('.').next().unwrap_or_default();
        match ext {
            "m4a" | "mp3" | "wav" => Some(Self::Audio),
            "pdf" => Some(Self::Pdf),
            "jpg" | "jpeg" | "png" => Some(Self::Image),
            "xlsx" | "xls" => Some(Self::Excel),
            "csv" => Some(Self::Csv),
            "docx" | "doc" => Some(Self::Word),
            _ => None,
        }
    }
}

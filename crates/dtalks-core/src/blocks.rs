//! Block-formatted outbound payloads
//!
//! The chat platform renders a message either as plain `{"text": ..}` or as a
//! list of typed blocks. Each block kind is a variant here instead of an ad hoc
//! JSON map.

use serde::Serialize;

use crate::types::{FaqAnswer, FaqCategory, FaqQuestion, LinkData};

/// Inline span inside a text block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inline {
    Styled {
        text: String,
        bold: bool,
        color: String,
    },
    Link {
        text: String,
        url: String,
    },
}

impl Inline {
    pub fn styled(text: impl Into<String>, bold: bool, color: &str) -> Self {
        Self::Styled {
            text: text.into(),
            bold,
            color: color.to_string(),
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::styled(text, false, "default")
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Link {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// Nested `{"type": "text", ...}` content used by description and context blocks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inlines: Vec<Inline>,
}

impl TextContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            inlines: Vec::new(),
        }
    }

    pub fn with_inlines(mut self, inlines: Vec<Inline>) -> Self {
        self.inlines = inlines;
        self
    }
}

/// Top-level block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        text: String,
        style: String,
    },
    Description {
        term: String,
        content: TextContent,
        accent: bool,
    },
    Text {
        text: String,
        inlines: Vec<Inline>,
    },
    Context {
        content: TextContent,
    },
}

impl Block {
    pub fn header(text: impl Into<String>) -> Self {
        Self::Header {
            text: text.into(),
            style: "white".to_string(),
        }
    }

    pub fn description(term: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Description {
            term: term.into(),
            content: TextContent::plain(value),
            accent: true,
        }
    }

    pub fn text(text: impl Into<String>, inlines: Vec<Inline>) -> Self {
        Self::Text {
            text: text.into(),
            inlines,
        }
    }
}

/// A message made of blocks plus the fallback text shown in notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockMessage {
    pub text: String,
    pub blocks: Vec<Block>,
}

const FAQ_FALLBACK_TEXT: &str = "FAQ 메시지입니다.";

impl BlockMessage {
    /// Rating request sent after some completed exchanges
    pub fn feedback_prompt() -> Self {
        let title = "챗봇을 평가해주세요!";
        Self {
            text: title.to_string(),
            blocks: vec![
                Block::header(title),
                Block::text(
                    "좋아요",
                    vec![
                        Inline::plain("👍 : "),
                        Inline::styled("\"@좋아요\"", true, "red"),
                        Inline::plain("를 입력해주세요."),
                    ],
                ),
                Block::text(
                    "아쉬워요",
                    vec![
                        Inline::plain("👎 : "),
                        Inline::styled("\"@싫어요\"", true, "blue"),
                        Inline::plain("를 입력해주세요."),
                    ],
                ),
            ],
        }
    }

    /// Link to a matched form template
    pub fn form_link(link: &LinkData) -> Self {
        let text = "요청하신 양식입니다.";
        Self {
            text: text.to_string(),
            blocks: vec![Block::Context {
                content: TextContent::plain(text)
                    .with_inlines(vec![Inline::link(&link.title, &link.url)]),
            }],
        }
    }

    pub fn faq_categories(categories: &[FaqCategory]) -> Self {
        let mut blocks = vec![Block::header("FAQ 카테고리")];
        blocks.extend(
            categories
                .iter()
                .map(|c| Block::description(c.category_id.to_string(), &c.name)),
        );
        blocks.push(number_hint("를 입력하면 해당 카테고리의 질문을 볼 수 있습니다!"));
        Self {
            text: FAQ_FALLBACK_TEXT.to_string(),
            blocks,
        }
    }

    pub fn faq_questions(questions: &[FaqQuestion]) -> Self {
        let mut blocks = vec![Block::header("FAQ 질문")];
        blocks.extend(
            questions
                .iter()
                .map(|q| Block::description(q.faq_id.to_string(), &q.question)),
        );
        blocks.push(number_hint("를 입력하면 해당 질문에 대한 답변을 볼 수 있습니다!"));
        Self {
            text: FAQ_FALLBACK_TEXT.to_string(),
            blocks,
        }
    }

    pub fn faq_answer(entry: &FaqAnswer) -> Self {
        Self {
            text: FAQ_FALLBACK_TEXT.to_string(),
            blocks: vec![
                Block::header("FAQ"),
                Block::text(
                    "question",
                    vec![
                        Inline::styled("Q. ", true, "red"),
                        Inline::plain(&entry.question),
                    ],
                ),
                Block::text(
                    "answer",
                    vec![
                        Inline::styled("  A. ", true, "blue"),
                        Inline::plain(&entry.answer),
                    ],
                ),
            ],
        }
    }
}

fn number_hint(suffix: &str) -> Block {
    Block::text(
        "description",
        vec![Inline::styled("번호", true, "red"), Inline::plain(suffix)],
    )
}

/// Anything the bot can post back to the channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Text { text: String },
    Blocks(BlockMessage),
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

impl From<BlockMessage> for OutboundMessage {
    fn from(message: BlockMessage) -> Self {
        Self::Blocks(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_block_shape() {
        let value = serde_json::to_value(Block::header("FAQ")).unwrap();
        assert_eq!(value, json!({"type": "header", "text": "FAQ", "style": "white"}));
    }

    #[test]
    fn test_description_block_shape() {
        let value = serde_json::to_value(Block::description("3", "복지")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "description",
                "term": "3",
                "content": {"type": "text", "text": "복지"},
                "accent": true
            })
        );
    }

    #[test]
    fn test_form_link_shape() {
        let link = LinkData {
            title: "휴가 신청서".to_string(),
            url: "https://files/vacation.docx".to_string(),
        };
        let value = serde_json::to_value(BlockMessage::form_link(&link)).unwrap();
        assert_eq!(value["blocks"][0]["type"], "context");
        assert_eq!(value["blocks"][0]["content"]["inlines"][0]["type"], "link");
        assert_eq!(
            value["blocks"][0]["content"]["inlines"][0]["url"],
            "https://files/vacation.docx"
        );
    }

    #[test]
    fn test_feedback_prompt_mentions_commands() {
        let message = BlockMessage::feedback_prompt();
        let raw = serde_json::to_string(&message).unwrap();
        assert!(raw.contains("@좋아요"));
        assert!(raw.contains("@싫어요"));
        assert_eq!(message.blocks.len(), 3);
    }

    #[test]
    fn test_faq_categories_lists_each_row() {
        let categories = vec![
            FaqCategory { category_id: 1, name: "IT".into(), description: String::new() },
            FaqCategory { category_id: 2, name: "인사".into(), description: String::new() },
        ];
        let message = BlockMessage::faq_categories(&categories);
        // header + two rows + hint
        assert_eq!(message.blocks.len(), 4);
    }

    #[test]
    fn test_plain_outbound_is_text_object() {
        let value = serde_json::to_value(OutboundMessage::text("hi")).unwrap();
        assert_eq!(value, json!({"text": "hi"}));
    }
}

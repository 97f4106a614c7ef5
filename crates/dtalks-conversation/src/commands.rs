//! `@` commands and the fixed side-channel replies

pub const EMPTY_MESSAGE: &str = "메시지를 찾을 수 없습니다.";
pub const NUMBERS_ONLY: &str =
    "숫자만 입력해 주세요! 다른 대화가 하고 싶으시면 \"@나가기\"를 입력해주세요!";
pub const FEEDBACK_THANKS: &str =
    "피드백 감사합니다! 더 좋은 서비스를 제공하기 위해 노력하겠습니다!";
pub const FEEDBACK_WITHOUT_EXCHANGE: &str = "평가를 진행하기 전에 대화를 먼저 해주세요!";
pub const FAQ_EXITED: &str = "FAQ 대화가 종료되었습니다. 궁금한 것을 물어보세요!";
pub const UNKNOWN_COMMAND: &str =
    "오타가 있거나 언급된 내용을 지원하지 않습니다. 다시 입력해주세요!";
pub const UNKNOWN_SELECTION: &str =
    "목록에 있는 번호를 입력해 주세요! 다른 대화가 하고 싶으시면 \"@나가기\"를 입력해주세요!";
pub const FAQ_UNAVAILABLE: &str = "FAQ 정보를 불러오지 못했어요. 잠시 후 다시 시도해 주세요.";

const PREFIX: char = '@';

/// Side-channel command recognised ahead of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Like,
    Dislike,
    Faq,
    ExitFaq,
    Unknown(String),
}

impl Command {
    /// Parse a message; `None` when it is not a command at all
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with(PREFIX) {
            return None;
        }
        let command = match text {
            "@좋아요" => Self::Like,
            "@싫어요" => Self::Dislike,
            "@나가기" => Self::ExitFaq,
            other if other.eq_ignore_ascii_case("@faq") => Self::Faq,
            other => Self::Unknown(other.to_string()),
        };
        Some(command)
    }

    pub fn is_feedback(&self) -> bool {
        matches!(self, Self::Like | Self::Dislike)
    }
}

/// Bare integer selection, e.g. a category or question number
pub fn parse_selection(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("@좋아요"), Some(Command::Like));
        assert_eq!(Command::parse(" @싫어요 "), Some(Command::Dislike));
        assert_eq!(Command::parse("@FAQ"), Some(Command::Faq));
        assert_eq!(Command::parse("@faq"), Some(Command::Faq));
        assert_eq!(Command::parse("@Faq"), Some(Command::Faq));
        assert_eq!(Command::parse("@나가기"), Some(Command::ExitFaq));
        assert_eq!(
            Command::parse("@좋아"),
            Some(Command::Unknown("@좋아".to_string()))
        );
        assert_eq!(Command::parse("연차 신청 양식"), None);
    }

    #[test]
    fn test_feedback_commands() {
        assert!(Command::Like.is_feedback());
        assert!(Command::Dislike.is_feedback());
        assert!(!Command::Faq.is_feedback());
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("3"), Some(3));
        assert_eq!(parse_selection(" 12 "), Some(12));
        assert_eq!(parse_selection("-1"), None);
        assert_eq!(parse_selection("3번"), None);
        assert_eq!(parse_selection(""), None);
        assert_eq!(parse_selection("99999999999999999999999"), None);
    }
}

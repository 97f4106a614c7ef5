//! Keyword overrides that take precedence over the learned model.
//!
//! Korean sets are matched against the raw text, English sets against the
//! lowercased text. The first rule that matches wins.

use dtalks_core::Label;

/// Keyword set tied to a label
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub label: Label,
    pub keywords: Vec<String>,
    /// Match against the lowercased text
    pub case_insensitive: bool,
}

impl KeywordRule {
    pub fn new(label: Label, keywords: &[&str], case_insensitive: bool) -> Self {
        Self {
            label,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            case_insensitive,
        }
    }

    fn matches(&self, raw: &str, lowered: &str) -> bool {
        let haystack = if self.case_insensitive { lowered } else { raw };
        self.keywords.iter().any(|k| haystack.contains(k.as_str()))
    }
}

/// Ordered list of keyword rules
#[derive(Debug, Clone)]
pub struct KeywordRules {
    rules: Vec<KeywordRule>,
}

impl KeywordRules {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    /// No overrides at all
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Label of the first matching rule
    pub fn check(&self, text: &str) -> Option<Label> {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(text, &lowered))
            .map(|rule| rule.label.clone())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for KeywordRules {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(
                Label::OrgChart,
                &["조직도", "부서", "인원", "팀원", "소속", "구성원"],
                false,
            ),
            KeywordRule::new(
                Label::FormRequest,
                &["양식", "폼", "서식", "신청서", "템플릿"],
                false,
            ),
            KeywordRule::new(
                Label::InternalInfo,
                &[
                    "내부", "사내", "규정", "정책", "FAQ", "문의", "재택", "재택근무", "근태",
                    "연차", "휴가", "복지", "급여", "경조",
                ],
                false,
            ),
            KeywordRule::new(
                Label::OrgChart,
                &["org", "member", "people", "headcount"],
                true,
            ),
            KeywordRule::new(
                Label::FormRequest,
                &["form", "template", "request form"],
                true,
            ),
            KeywordRule::new(Label::InternalInfo, &["policy", "internal", "faq"], true),
        ])
    }
}

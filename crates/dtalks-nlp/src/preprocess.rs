//! Text normalisation shared by training, prediction and sentence vectors.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DISALLOWED: Regex = Regex::new(r"[^\w\s가-힣?!]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Replace punctuation with spaces, collapse whitespace and trim.
///
/// Word characters (including Hangul), `?` and `!` survive.
pub fn preprocess_text(input: &str) -> String {
    let cleaned = DISALLOWED.replace_all(input, " ");
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

/// Whitespace tokens of the preprocessed text, lowercased
pub fn tokenize(input: &str) -> Vec<String> {
    preprocess_text(input)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

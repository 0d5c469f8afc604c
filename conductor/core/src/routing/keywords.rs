//! Keyword matching for fallback routing

use std::collections::{BTreeSet, HashSet};

/// Lowercase alphanumeric tokens of `text`
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Number of distinct tokens
#[must_use]
pub fn distinct_tokens(tokens: &[String]) -> usize {
    tokens.iter().collect::<HashSet<_>>().len()
}

/// Keywords present in `tokens`, in set order
///
/// Multi-word keywords must appear as a contiguous phrase.
#[must_use]
pub fn matched_keywords<'a>(tokens: &[String], keywords: &'a BTreeSet<String>) -> Vec<&'a str> {
    keywords
        .iter()
        .filter(|keyword| {
            let phrase = tokenize(keyword);
            !phrase.is_empty() && tokens.windows(phrase.len()).any(|window| window == phrase)
        })
        .map(String::as_str)
        .collect()
}

/// Count keywords present in `tokens`; each keyword counts once
#[must_use]
pub fn keyword_hits(tokens: &[String], keywords: &BTreeSet<String>) -> usize {
    matched_keywords(tokens, keywords).len()
}

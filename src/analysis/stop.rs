//! Stop words.
//!
//! Stop words are still indexed, so a query can match them, but they never
//! count as query keywords: they only act as secondary tokens that boost
//! documents already found through a keyword.

use std::collections::HashSet;
use std::sync::LazyLock;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

const CHINESE_STOP_WORDS: &[&str] = &[
    "的", "了", "和", "是", "就", "都", "而", "及", "与", "着", "或", "一个", "没有", "我们",
    "你们", "他们", "它们", "这个", "那个", "这些", "那些", "在", "也", "很", "之", "把", "被",
];

/// Every built-in stop word.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    ENGLISH_STOP_WORDS
        .iter()
        .chain(CHINESE_STOP_WORDS)
        .copied()
        .collect()
});

/// Whether `word` (already lowercased) is a stop word.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

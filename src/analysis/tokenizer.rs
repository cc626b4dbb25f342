//! Tokenizers.
//!
//! Two implementations are available, selected by [`TokenizerKind`]:
//!
//! - [`standard::StandardTokenizer`] (`"standard"`) splits on Unicode word
//!   boundaries (UAX #29).
//! - [`jieba::JiebaTokenizer`] (`"jieba"`) runs the jieba segmenter in search
//!   mode, which handles Chinese and mixed Chinese/English text.
//!
//! # Examples
//!
//! ```
//! use quarry::analysis::{Tokenizer, TokenizerKind};
//!
//! let tokenizer = TokenizerKind::Standard.build();
//! assert_eq!(tokenizer.tokenize("Hello, World!"), vec!["hello", "world"]);
//!
//! let keywords = tokenizer.keywords("the rust book about rust", 10);
//! assert_eq!(keywords, vec!["rust", "book", "about"]);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::stop::is_stop_word;
use crate::error::{QuarryError, Result};

pub mod jieba;
pub mod standard;

pub use jieba::JiebaTokenizer;
pub use standard::StandardTokenizer;

/// A keyword together with its relative importance in a text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordWeight {
    pub word: String,
    pub weight: f64,
}

/// Splits text into tokens and ranks keywords.
///
/// Implementations must be deterministic: the same text always yields the same
/// tokens in the same order.
pub trait Tokenizer: Send + Sync + fmt::Debug {
    /// Split `text` into lowercase tokens, in order of appearance. Tokens may
    /// repeat.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// The `top_k` most significant keywords of `text`, heaviest first.
    ///
    /// Stop words and single-character tokens are never keywords. The default
    /// weights are term frequencies normalised over the remaining tokens.
    fn keywords_weight(&self, text: &str, top_k: usize) -> Vec<WordWeight> {
        weigh(self.tokenize(text), top_k)
    }

    /// Like [`Tokenizer::keywords_weight`] without the weights.
    fn keywords(&self, text: &str, top_k: usize) -> Vec<String> {
        self.keywords_weight(text, top_k)
            .into_iter()
            .map(|w| w.word)
            .collect()
    }

    fn name(&self) -> &'static str;
}

/// Tag selecting a [`Tokenizer`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    #[default]
    Standard,
    Jieba,
}

impl TokenizerKind {
    pub fn build(self) -> Arc<dyn Tokenizer> {
        match self {
            TokenizerKind::Standard => Arc::new(StandardTokenizer::new()),
            TokenizerKind::Jieba => Arc::new(JiebaTokenizer::new()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerKind::Standard => "standard",
            TokenizerKind::Jieba => "jieba",
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenizerKind {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(TokenizerKind::Standard),
            "jieba" => Ok(TokenizerKind::Jieba),
            other => Err(QuarryError::invalid_argument(format!(
                "unknown tokenizer '{other}'"
            ))),
        }
    }
}

/// Whether `token` has at least one letter or digit.
pub fn is_meaningful(token: &str) -> bool {
    token.chars().any(char::is_alphanumeric)
}

fn weigh(tokens: Vec<String>, top_k: usize) -> Vec<WordWeight> {
    // word -> (occurrences, first position)
    let mut counts: AHashMap<String, (usize, usize)> = AHashMap::new();
    let mut total = 0usize;
    for (pos, token) in tokens.into_iter().enumerate() {
        if token.chars().count() < 2 || !is_meaningful(&token) || is_stop_word(&token) {
            continue;
        }
        total += 1;
        counts.entry(token).or_insert((0, pos)).0 += 1;
    }
    if total == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(top_k);

    ranked
        .into_iter()
        .map(|(word, count, _)| WordWeight {
            word,
            weight: count as f64 / total as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_build() {
        assert_eq!("JIEBA".parse::<TokenizerKind>().unwrap(), TokenizerKind::Jieba);
        assert!("whitespace".parse::<TokenizerKind>().is_err());
        assert_eq!(TokenizerKind::Standard.build().name(), "standard");
        assert_eq!(TokenizerKind::Jieba.build().name(), "jieba");
    }

    #[test]
    fn test_weigh_orders_by_frequency_then_position() {
        let tokens = ["go", "rust", "the", "rust", "x", "go", "zig"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let weights = weigh(tokens, 10);
        let words: Vec<&str> = weights.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["go", "rust", "zig"]);
        assert!((weights[0].weight - 0.4).abs() < 1e-9);
        assert!((weights[2].weight - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_weigh_truncates_and_handles_empty() {
        let tokens = vec!["alpha".to_string(), "beta".to_string()];
        assert_eq!(weigh(tokens, 1).len(), 1);
        assert!(weigh(vec!["the".to_string(), "!".to_string()], 5).is_empty());
    }

    #[test]
    fn test_is_meaningful() {
        assert!(is_meaningful("a1"));
        assert!(is_meaningful("中文"));
        assert!(!is_meaningful("--"));
        assert!(!is_meaningful(""));
    }
}

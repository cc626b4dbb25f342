//! Chinese tokenizer backed by jieba-rs.

use std::sync::LazyLock;

use ahash::AHashMap;
use jieba_rs::{Jieba, KeywordExtract, TfIdf};

use crate::analysis::stop::is_stop_word;
use crate::analysis::tokenizer::{Tokenizer, WordWeight, is_meaningful};

// Loading the dictionaries is expensive, share them process-wide.
static JIEBA: LazyLock<Jieba> = LazyLock::new(Jieba::new);
static TFIDF: LazyLock<TfIdf> = LazyLock::new(TfIdf::default);

/// Segments text with jieba in search mode (finer grained, long words are
/// also emitted as their sub-words) and lowercases the result.
#[derive(Clone, Debug, Default)]
pub struct JiebaTokenizer;

impl JiebaTokenizer {
    pub fn new() -> Self {
        JiebaTokenizer
    }
}

impl Tokenizer for JiebaTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        JIEBA
            .cut_for_search(text, true)
            .into_iter()
            .map(str::trim)
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Keywords ranked by jieba's TF-IDF extractor (bundled IDF dictionary).
    fn keywords_weight(&self, text: &str, top_k: usize) -> Vec<WordWeight> {
        if top_k == 0 {
            return Vec::new();
        }

        // Lowercasing can merge keywords, their weights add up.
        let mut merged: AHashMap<String, f64> = AHashMap::new();
        for keyword in TFIDF.extract_keywords(&JIEBA, text, top_k, Vec::new()) {
            let word = keyword.keyword.trim().to_lowercase();
            if word.chars().count() < 2 || !is_meaningful(&word) || is_stop_word(&word) {
                continue;
            }
            *merged.entry(word).or_insert(0.0) += keyword.weight;
        }

        let mut weights: Vec<WordWeight> = merged
            .into_iter()
            .map(|(word, weight)| WordWeight { word, weight })
            .collect();
        weights.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.word.cmp(&b.word)));
        weights
    }

    fn name(&self) -> &'static str {
        "jieba"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_text() {
        let tokenizer = JiebaTokenizer::new();
        let tokens = tokenizer.tokenize("我们中出了一个叛徒 Rust");
        assert!(tokens.contains(&"叛徒".to_string()));
        assert!(tokens.contains(&"rust".to_string()));
        assert!(tokens.iter().all(|t| !t.trim().is_empty()));
    }

    #[test]
    fn test_keywords_skip_stop_words() {
        let tokenizer = JiebaTokenizer::new();
        let keywords = tokenizer.keywords("我们的搜索引擎", 10);
        assert!(!keywords.contains(&"我们".to_string()));
        assert!(!keywords.contains(&"的".to_string()));
        assert!(!keywords.is_empty());
    }

    #[test]
    fn test_keywords_weight_uses_tfidf() {
        let tokenizer = JiebaTokenizer::new();
        let text = "今天纽约的天气真好啊，京华大酒店的张尧经理吃了一只北京烤鸭。后天纽约的天气不好，昨天纽约的天气也不好，北京烤鸭真好吃";
        let weights = tokenizer.keywords_weight(text, 3);
        let words: Vec<&str> = weights.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, vec!["北京烤鸭", "纽约", "天气"]);
        assert!(weights.windows(2).all(|pair| pair[0].weight >= pair[1].weight));
        assert!(tokenizer.keywords_weight(text, 0).is_empty());
    }

    #[test]
    fn test_keywords_weight_lowercases() {
        let tokenizer = JiebaTokenizer::new();
        let weights = tokenizer.keywords_weight("Rust 编程语言 rust", 10);
        assert_eq!(weights.iter().filter(|w| w.word == "rust").count(), 1);
        assert!(weights.iter().all(|w| w.word.to_lowercase() == w.word));
    }
}

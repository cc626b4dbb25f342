//! Unicode word tokenizer.

use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::tokenizer::Tokenizer;

/// Splits text on Unicode word boundaries and lowercases every word.
///
/// Punctuation and whitespace segments are dropped by the segmentation
/// itself.
#[derive(Clone, Debug, Default)]
pub struct StandardTokenizer;

impl StandardTokenizer {
    pub fn new() -> Self {
        StandardTokenizer
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words().map(str::to_lowercase).collect()
    }

    fn name(&self) -> &'static str {
        "standard"
    }
}

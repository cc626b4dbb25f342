//! Documents and keyword extraction.
//!
//! A [`Document`] wraps an arbitrary JSON object (`_source`) with an id, a
//! timestamp and the keyword set extracted from the source. The keywords are
//! stored alongside the source so that deleting or replacing a document can
//! unmap exactly what was mapped, without tokenizing again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::Tokenizer;
use crate::analysis::tokenizer::is_meaningful;
use crate::error::{QuarryError, Result};

/// A stored JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,

    /// Name of the owning index. Filled in on retrieval, not persisted input.
    #[serde(rename = "_index", default)]
    pub index: String,

    #[serde(rename = "@timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Deduplicated keywords derived from `source`.
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl Document {
    /// Create a document stamped with the current time. An empty `id` asks the
    /// index to assign one.
    pub fn new(id: impl Into<String>, source: Map<String, Value>) -> Self {
        Document {
            id: id.into(),
            index: String::new(),
            timestamp: Utc::now(),
            keywords: Vec::new(),
            source,
        }
    }

    /// Build a document from a JSON value, which must be an object.
    pub fn from_value(id: impl Into<String>, value: Value) -> Result<Self> {
        match value {
            Value::Object(source) => Ok(Document::new(id, source)),
            other => Err(QuarryError::invalid_argument(format!(
                "document source must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Recompute `keywords` from `source`.
    pub fn analyze(&mut self, tokenizer: &dyn Tokenizer) {
        self.keywords = extract_keywords(tokenizer, &self.source);
    }
}

/// Flatten nested objects and arrays into ordered `(path, scalar)` pairs.
///
/// Object keys are joined with `.`, array elements use their index as the
/// path segment (`tags.0`). Null values are skipped.
///
/// ```
/// use serde_json::json;
/// use quarry::document::flatten;
///
/// let source = json!({"user": {"name": "ann", "tags": ["a", "b"]}, "gone": null});
/// let pairs: Vec<(String, String)> = flatten(source.as_object().unwrap())
///     .into_iter()
///     .map(|(path, value)| (path, value.to_string()))
///     .collect();
/// assert_eq!(pairs.len(), 3);
/// assert_eq!(pairs[0].0, "user.name");
/// assert_eq!(pairs[2].0, "user.tags.1");
/// ```
pub fn flatten(source: &Map<String, Value>) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    for (key, value) in source {
        flatten_into(key.clone(), value, &mut out);
    }
    out
}

fn flatten_into<'a>(path: String, value: &'a Value, out: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(format!("{path}.{key}"), child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(format!("{path}.{i}"), child, out);
            }
        }
        scalar => out.push((path, scalar)),
    }
}

/// Render a scalar JSON value as text; strings are not quoted.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extract the deduplicated keyword set of a source object.
///
/// Every scalar is stringified and tokenized; tokens are trimmed and the ones
/// without any letter or digit are dropped. Order of first appearance is kept.
pub fn extract_keywords(tokenizer: &dyn Tokenizer, source: &Map<String, Value>) -> Vec<String> {
    let mut seen = ahash::AHashSet::new();
    let mut keywords = Vec::new();
    for (_, value) in flatten(source) {
        for token in tokenizer.tokenize(&scalar_to_string(value)) {
            let token = token.trim();
            if token.is_empty() || !is_meaningful(token) {
                continue;
            }
            if seen.insert(token.to_string()) {
                keywords.push(token.to_string());
            }
        }
    }
    keywords
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::TokenizerKind;
    use serde_json::json;

    #[test]
    fn test_flatten_paths() {
        let source = json!({
            "title": "Hello",
            "meta": {"views": 3, "flags": [true, null, "x"]},
        });
        let flat = flatten(source.as_object().unwrap());
        let paths: Vec<&str> = flat.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["meta.flags.0", "meta.flags.2", "meta.views", "title"]);
    }

    #[test]
    fn test_extract_keywords_dedupes() {
        let tokenizer = TokenizerKind::Standard.build();
        let source = json!({
            "title": "Rust, rust and more RUST!",
            "tags": ["rust", "search-engine"],
            "year": 2024,
        });
        let keywords = extract_keywords(tokenizer.as_ref(), source.as_object().unwrap());
        assert_eq!(keywords.iter().filter(|k| *k == "rust").count(), 1);
        assert!(keywords.contains(&"search".to_string()));
        assert!(keywords.contains(&"2024".to_string()));
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(Document::from_value("1", json!({"a": 1})).is_ok());
        match Document::from_value("1", json!([1, 2])) {
            Err(QuarryError::InvalidArgument(msg)) => assert!(msg.contains("array")),
            other => panic!("Expected invalid argument, got {other:?}"),
        }
    }

    #[test]
    fn test_serde_field_names() {
        let doc = Document::new("42", json!({"a": 1}).as_object().unwrap().clone());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], "42");
        assert_eq!(value["_source"]["a"], 1);
        assert!(value.get("@timestamp").is_some());

        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }
}

//! Newline-delimited bulk requests with per-item results.
//!
//! The body is a sequence of action lines, each followed by a source line
//! unless the action is `delete`:
//!
//! ```text
//! {"index": {"_index": "books", "_id": "1"}}
//! {"title": "Dune"}
//! {"update": {"_index": "books", "_id": "1"}}
//! {"doc": {"year": 1965}}
//! {"delete": {"_index": "books", "_id": "2"}}
//! ```
//!
//! The whole body is parsed and checked before anything is written; a
//! malformed body fails with [`QuarryError::BulkFormat`]. Items are then
//! applied one by one through the single-document pipeline and every item
//! gets its own result. A failing item does not stop the others, which is
//! what sets this path apart from [`Index::bulk_documents`](crate::index::Index::bulk_documents).

use std::fmt;
use std::io::BufRead;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::Document;
use crate::engine::Engine;
use crate::error::{QuarryError, Result};

/// What a bulk item asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkActionKind {
    /// Create or replace.
    Index,
    /// Create, failing if the id exists.
    Create,
    /// Partial (`{"doc": {...}}`) or full update of an existing document.
    Update,
    Delete,
}

impl BulkActionKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "index" => Some(BulkActionKind::Index),
            "create" => Some(BulkActionKind::Create),
            "update" => Some(BulkActionKind::Update),
            "delete" => Some(BulkActionKind::Delete),
            _ => None,
        }
    }

    fn has_source(self) -> bool {
        self != BulkActionKind::Delete
    }
}

impl fmt::Display for BulkActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BulkActionKind::Index => "index",
            BulkActionKind::Create => "create",
            BulkActionKind::Update => "update",
            BulkActionKind::Delete => "delete",
        })
    }
}

/// One parsed action with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub action: BulkActionKind,
    pub index: Option<String>,
    pub id: Option<String>,
    pub source: Option<Map<String, Value>>,
    /// Line of the action, 1-based.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardsInfo {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
}

/// Result of one bulk item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemResult {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: &'static str,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_version")]
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "_shards", skip_serializing_if = "Option::is_none")]
    pub shards: Option<ShardsInfo>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "_seq_no")]
    pub seq_no: usize,
    #[serde(rename = "_primary_term")]
    pub primary_term: u64,
}

/// A result keyed by its action, e.g. `{"index": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkResponseItem {
    Index(BulkItemResult),
    Create(BulkItemResult),
    Update(BulkItemResult),
    Delete(BulkItemResult),
}

impl BulkResponseItem {
    fn new(action: BulkActionKind, result: BulkItemResult) -> Self {
        match action {
            BulkActionKind::Index => BulkResponseItem::Index(result),
            BulkActionKind::Create => BulkResponseItem::Create(result),
            BulkActionKind::Update => BulkResponseItem::Update(result),
            BulkActionKind::Delete => BulkResponseItem::Delete(result),
        }
    }

    pub fn result(&self) -> &BulkItemResult {
        match self {
            BulkResponseItem::Index(r)
            | BulkResponseItem::Create(r)
            | BulkResponseItem::Update(r)
            | BulkResponseItem::Delete(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkResponse {
    pub took: u64,
    /// Whether any item failed.
    pub errors: bool,
    pub items: Vec<BulkResponseItem>,
}

/// Parse a newline-delimited bulk body. Blank lines are ignored.
pub fn parse_bulk<R: BufRead>(reader: R) -> Result<Vec<BulkItem>> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|text| (i + 1, text)))
        .filter(|line| !matches!(line, Ok((_, text)) if text.trim().is_empty()));

    let mut items = Vec::new();
    while let Some(line) = lines.next() {
        let (line_no, text) = line?;
        let (action, meta) = parse_action(line_no, &text)?;

        let index = meta_string(line_no, &meta, "_index")?;
        let id = meta_string(line_no, &meta, "_id")?;
        if matches!(action, BulkActionKind::Update | BulkActionKind::Delete) && id.is_none() {
            return Err(QuarryError::bulk_format(line_no, format!("{action} requires an _id")));
        }

        let source = if action.has_source() {
            let Some(next) = lines.next() else {
                return Err(QuarryError::bulk_format(
                    line_no,
                    format!("{action} action is missing its source line"),
                ));
            };
            let (source_no, text) = next?;
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(source)) => Some(source),
                Ok(_) => {
                    return Err(QuarryError::bulk_format(source_no, "source must be a JSON object"));
                }
                Err(e) => return Err(QuarryError::bulk_format(source_no, e.to_string())),
            }
        } else {
            None
        };

        items.push(BulkItem {
            action,
            index,
            id,
            source,
            line: line_no,
        });
    }
    Ok(items)
}

fn parse_action(line_no: usize, text: &str) -> Result<(BulkActionKind, Map<String, Value>)> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| QuarryError::bulk_format(line_no, e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(QuarryError::bulk_format(line_no, "action must be a JSON object"));
    };
    if object.len() != 1 {
        return Err(QuarryError::bulk_format(
            line_no,
            "action must have exactly one key",
        ));
    }
    let Some((name, meta)) = object.into_iter().next() else {
        return Err(QuarryError::bulk_format(line_no, "empty action"));
    };
    let action = BulkActionKind::parse(&name)
        .ok_or_else(|| QuarryError::bulk_format(line_no, format!("unknown action '{name}'")))?;
    match meta {
        Value::Object(meta) => Ok((action, meta)),
        _ => Err(QuarryError::bulk_format(
            line_no,
            format!("metadata of '{name}' must be an object"),
        )),
    }
}

fn meta_string(line_no: usize, meta: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    match meta.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(QuarryError::bulk_format(
            line_no,
            format!("{field} must be a string"),
        )),
    }
}

/// An item-level failure: an HTTP-style status and a message.
struct ItemFailure {
    status: u16,
    error: String,
}

impl From<QuarryError> for ItemFailure {
    fn from(e: QuarryError) -> Self {
        ItemFailure {
            status: e.status_code(),
            error: e.to_string(),
        }
    }
}

/// Outcome of a successful item: final id, result word and status.
type ItemSuccess = (String, &'static str, u16);

/// Apply parsed items against `engine`.
pub(crate) fn execute(
    engine: &Engine,
    default_index: Option<&str>,
    items: Vec<BulkItem>,
) -> Result<BulkResponse> {
    let start = Instant::now();

    let mut targets = Vec::with_capacity(items.len());
    for item in &items {
        match item.index.as_deref().or(default_index) {
            Some(name) => targets.push(name.to_string()),
            None => {
                return Err(QuarryError::bulk_format(item.line, "no index specified"));
            }
        }
    }

    let mut errors = false;
    let mut responses = Vec::with_capacity(items.len());
    for (seq_no, (item, index_name)) in items.into_iter().zip(targets).enumerate() {
        let action = item.action;
        let requested_id = item.id.clone().unwrap_or_default();
        let result = match apply_item(engine, &index_name, item) {
            Ok((id, result, status)) => BulkItemResult {
                index: index_name,
                doc_type: "_doc",
                id,
                version: 1,
                result: Some(result.to_string()),
                shards: Some(ShardsInfo {
                    total: 1,
                    successful: u32::from(status < 300),
                    failed: 0,
                }),
                status,
                error: None,
                seq_no,
                primary_term: 1,
            },
            Err(failure) => {
                errors = true;
                BulkItemResult {
                    index: index_name,
                    doc_type: "_doc",
                    id: requested_id,
                    version: 1,
                    result: None,
                    shards: None,
                    status: failure.status,
                    error: Some(failure.error),
                    seq_no,
                    primary_term: 1,
                }
            }
        };
        responses.push(BulkResponseItem::new(action, result));
    }

    let took = start.elapsed().as_millis() as u64;
    tracing::info!(items = responses.len(), errors, took_ms = took, "applied bulk request");
    Ok(BulkResponse {
        took,
        errors,
        items: responses,
    })
}

fn apply_item(
    engine: &Engine,
    index_name: &str,
    item: BulkItem,
) -> std::result::Result<ItemSuccess, ItemFailure> {
    let id = item.id.unwrap_or_default();
    let source = item.source.unwrap_or_default();

    match item.action {
        BulkActionKind::Index => {
            let index = engine.get_or_create_index(index_name)?;
            let outcome = index.index_document(Document::new(id, source))?;
            Ok(created_or_updated(outcome.id, outcome.created))
        }
        BulkActionKind::Create => {
            let index = engine.get_or_create_index(index_name)?;
            if !id.is_empty() && index.retrieve_document(&id)?.is_some() {
                return Err(ItemFailure {
                    status: 409,
                    error: format!("Document already exists: {id}"),
                });
            }
            let outcome = index.index_document(Document::new(id, source))?;
            Ok(created_or_updated(outcome.id, outcome.created))
        }
        BulkActionKind::Update => {
            let index = engine.get_index(index_name)?;
            match source.get("doc") {
                Some(Value::Object(partial)) => {
                    let upsert = source.get("doc_as_upsert") == Some(&Value::Bool(true));
                    match index.update_document(&id, partial.clone()) {
                        Ok(outcome) => Ok((outcome.id, "updated", 200)),
                        Err(QuarryError::DocumentNotFound(_)) if upsert => {
                            let outcome =
                                index.index_document(Document::new(id, partial.clone()))?;
                            Ok(created_or_updated(outcome.id, outcome.created))
                        }
                        Err(e) => Err(e.into()),
                    }
                }
                Some(_) => Err(QuarryError::invalid_argument("\"doc\" must be an object").into()),
                None => {
                    if index.retrieve_document(&id)?.is_none() {
                        return Err(QuarryError::DocumentNotFound(id).into());
                    }
                    let outcome = index.index_document(Document::new(id, source))?;
                    Ok((outcome.id, "updated", 200))
                }
            }
        }
        BulkActionKind::Delete => {
            let index = engine.get_index(index_name)?;
            if index.delete_document(&id)? {
                Ok((id, "deleted", 200))
            } else {
                Ok((id, "not_found", 404))
            }
        }
    }
}

fn created_or_updated(id: String, created: bool) -> ItemSuccess {
    if created {
        (id, "created", 201)
    } else {
        (id, "updated", 200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_and_deletes() {
        let body = r#"{"index": {"_index": "books", "_id": "1"}}
{"title": "Dune"}

{"delete": {"_index": "books", "_id": 2}}
{"create": {}}
{"title": "no id"}
"#;
        let items = parse_bulk(body.as_bytes()).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].action, BulkActionKind::Index);
        assert_eq!(items[0].source.as_ref().unwrap()["title"], "Dune");
        assert_eq!(items[1].action, BulkActionKind::Delete);
        assert_eq!(items[1].id.as_deref(), Some("2"));
        assert_eq!(items[1].line, 4);
        assert!(items[2].index.is_none());
        assert!(items[2].id.is_none());
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let cases = [
            ("{\"index\": {}}\n", 1, "missing its source"),
            ("{\"upsert\": {}}\n{}\n", 1, "unknown action"),
            ("{\"index\": {}}\n[1]\n", 2, "must be a JSON object"),
            ("{\"index\": {}, \"delete\": {}}\n", 1, "exactly one key"),
            ("{\"delete\": {\"_index\": \"a\"}}\n", 1, "requires an _id"),
            ("not json\n", 1, ""),
        ];
        for (body, expected_line, fragment) in cases {
            match parse_bulk(body.as_bytes()) {
                Err(QuarryError::BulkFormat { line, message }) => {
                    assert_eq!(line, expected_line, "body {body:?}");
                    assert!(message.contains(fragment), "message {message:?}");
                }
                other => panic!("Expected BulkFormat for {body:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_response_item_shape() {
        let item = BulkResponseItem::new(
            BulkActionKind::Create,
            BulkItemResult {
                index: "books".into(),
                doc_type: "_doc",
                id: "1".into(),
                version: 1,
                result: Some("created".into()),
                shards: Some(ShardsInfo {
                    total: 1,
                    successful: 1,
                    failed: 0,
                }),
                status: 201,
                error: None,
                seq_no: 0,
                primary_term: 1,
            },
        );
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["create"]["_id"], "1");
        assert_eq!(value["create"]["_shards"]["successful"], 1);
        assert!(value["create"].get("error").is_none());
    }
}

//! Single-document indexing pipeline.

use ahash::AHashSet;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{QuarryError, Result};
use crate::index::Index;
use crate::storage::KvStore;

/// Result of writing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    /// The document id, generated when the caller left it empty.
    pub id: String,
    /// `true` for a new document, `false` when an existing one was replaced.
    pub created: bool,
}

impl Index {
    /// Index `doc`, replacing any stored document with the same id.
    ///
    /// Keywords of the replaced version that the new version no longer has
    /// are unmapped before the new keywords are mapped, so the inverted index
    /// ends up reflecting only the latest version.
    pub fn index_document(&self, mut doc: Document) -> Result<IndexOutcome> {
        let handles = self.handles()?;
        if doc.id.is_empty() {
            doc.id = Uuid::new_v4().to_string();
        }
        doc.index = self.name().to_string();
        doc.analyze(handles.tokenizer.as_ref());

        let created = {
            let _guard = handles.lock_doc(&doc.id);
            let previous = handles.load_document(&doc.id)?;
            if let Some(previous) = &previous {
                let current: AHashSet<&str> = doc.keywords.iter().map(String::as_str).collect();
                let stale: Vec<String> = previous
                    .keywords
                    .iter()
                    .filter(|k| !current.contains(k.as_str()))
                    .cloned()
                    .collect();
                handles.inverted.unmap_keywords(&stale, &doc.id)?;
            }
            handles.inverted.map_keywords(&doc.keywords, &doc.id)?;
            handles.docs.set(&doc.id, &serde_json::to_vec(&doc)?)?;
            previous.is_none()
        };

        self.update_meta(|meta| {
            if created {
                meta.doc_count += 1;
            }
            meta.observe(doc.timestamp);
            meta.touch();
        })?;

        tracing::debug!(index = self.name(), id = %doc.id, created, "indexed document");
        Ok(IndexOutcome {
            id: doc.id,
            created,
        })
    }

    /// Merge the top-level fields of `partial` into the stored source of `id`
    /// and re-index the result.
    pub fn update_document(&self, id: &str, partial: Map<String, Value>) -> Result<IndexOutcome> {
        let handles = self.handles()?;
        let mut doc = handles
            .load_document(id)?
            .ok_or_else(|| QuarryError::DocumentNotFound(id.to_string()))?;
        doc.source.extend(partial);
        self.index_document(doc)
    }

    /// Delete `id`. Returns `false` when there was nothing to delete.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let handles = self.handles()?;
        {
            let _guard = handles.lock_doc(id);
            let Some(previous) = handles.load_document(id)? else {
                return Ok(false);
            };
            handles.inverted.unmap_keywords(&previous.keywords, id)?;
            handles.docs.delete(id)?;
        }

        self.update_meta(|meta| {
            meta.doc_count = meta.doc_count.saturating_sub(1);
            meta.touch();
        })?;
        tracing::debug!(index = self.name(), id, "deleted document");
        Ok(true)
    }

    /// Fetch a stored document, `None` when the id is unknown.
    pub fn retrieve_document(&self, id: &str) -> Result<Option<Document>> {
        if id.is_empty() {
            return Ok(None);
        }
        let handles = self.handles()?;
        Ok(handles.load_document(id)?.map(|mut doc| {
            doc.index = self.name().to_string();
            doc
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::analysis::TokenizerKind;
    use crate::config::EngineConfig;
    use crate::index::IndexMeta;
    use crate::inverted::InvertedMode;
    use crate::storage::StorageKind;

    fn make_index(temp_dir: &TempDir, mode: InvertedMode) -> Index {
        let config = Arc::new(EngineConfig::new(temp_dir.path()));
        let meta_store = StorageKind::Snapshot.open(config.metadata_path()).unwrap();
        let meta = IndexMeta::new("notes", StorageKind::Log, TokenizerKind::Standard, mode, 3);
        Index::new(config, meta_store, meta)
    }

    fn doc(id: &str, source: Value) -> Document {
        Document::from_value(id, source).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let index = make_index(&temp_dir, InvertedMode::Sync);

        let outcome = index
            .index_document(doc("n1", json!({"title": "Quick brown fox"})))
            .unwrap();
        assert_eq!(outcome, IndexOutcome { id: "n1".into(), created: true });

        let stored = index.retrieve_document("n1").unwrap().unwrap();
        assert_eq!(stored.source["title"], "Quick brown fox");
        assert_eq!(stored.index, "notes");
        assert_eq!(stored.keywords, vec!["quick", "brown", "fox"]);

        assert!(index.delete_document("n1").unwrap());
        assert!(index.retrieve_document("n1").unwrap().is_none());
        assert!(!index.delete_document("n1").unwrap());
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_generated_id() {
        let temp_dir = TempDir::new().unwrap();
        let index = make_index(&temp_dir, InvertedMode::Sync);
        let outcome = index.index_document(doc("", json!({"a": "b"}))).unwrap();
        assert!(outcome.created);
        assert!(Uuid::parse_str(&outcome.id).is_ok());
    }

    #[test]
    fn test_reindex_replaces_keywords() {
        let temp_dir = TempDir::new().unwrap();
        let index = make_index(&temp_dir, InvertedMode::Sync);
        let handles = index.handles().unwrap();

        index.index_document(doc("1", json!({"body": "red apple"}))).unwrap();
        let outcome = index.index_document(doc("1", json!({"body": "green apple"}))).unwrap();
        assert!(!outcome.created);
        assert_eq!(index.doc_count(), 1);

        assert!(handles.inverted.get_ids("red").unwrap().is_empty());
        assert_eq!(handles.inverted.get_ids("green").unwrap(), vec!["1"]);
        assert_eq!(handles.inverted.get_ids("apple").unwrap(), vec!["1"]);
    }

    #[test]
    fn test_update_merges_fields() {
        let temp_dir = TempDir::new().unwrap();
        let index = make_index(&temp_dir, InvertedMode::Async);
        index
            .index_document(doc("1", json!({"title": "draft", "tags": ["x"]})))
            .unwrap();

        let partial = json!({"title": "final"}).as_object().unwrap().clone();
        let outcome = index.update_document("1", partial).unwrap();
        assert!(!outcome.created);

        let stored = index.retrieve_document("1").unwrap().unwrap();
        assert_eq!(stored.source["title"], "final");
        assert_eq!(stored.source["tags"], json!(["x"]));

        index.flush().unwrap();
        let handles = index.handles().unwrap();
        assert!(handles.inverted.get_ids("draft").unwrap().is_empty());

        match index.update_document("missing", Map::new()) {
            Err(QuarryError::DocumentNotFound(id)) => assert_eq!(id, "missing"),
            other => panic!("Expected DocumentNotFound, got {other:?}"),
        }
        index.close().unwrap();
    }
}

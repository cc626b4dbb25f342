//! Bulk executor.
//!
//! Writes many documents with far fewer storage round trips than the
//! single-document path. Documents are processed in chunks of
//! `bulk_batch_size`; within a chunk the keyword mapping and the document
//! writes run concurrently. Stored ids are not checked, so a document whose id
//! already exists is counted again; callers are expected to bulk-load
//! distinct, new documents.

use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::document::Document;
use crate::error::Result;
use crate::index::Index;
use crate::storage::KvStore;

/// Outcome of [`Index::bulk_documents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    /// Documents written.
    pub indexed: usize,
    /// Wall time in milliseconds.
    pub took: u64,
}

impl Index {
    /// Index `docs` in chunks.
    ///
    /// The first error aborts the call. Chunks written before it stay
    /// written and the metadata is left untouched; reopening the index
    /// recounts the documents.
    pub fn bulk_documents(&self, docs: Vec<Document>) -> Result<BulkSummary> {
        let start = Instant::now();
        let handles = self.handles()?;
        let batch_size = self.config().bulk_batch_size.max(1);

        let docs: Vec<Document> = docs
            .into_par_iter()
            .map(|mut doc| {
                if doc.id.is_empty() {
                    doc.id = Uuid::new_v4().to_string();
                }
                doc.index = self.name().to_string();
                doc.analyze(handles.tokenizer.as_ref());
                doc
            })
            .collect();

        for chunk in docs.chunks(batch_size) {
            let (mapped, stored) = rayon::join(
                || {
                    chunk
                        .par_iter()
                        .try_for_each(|doc| handles.inverted.map_keywords(&doc.keywords, &doc.id))
                },
                || {
                    let keys: Vec<String> = chunk.iter().map(|doc| doc.id.clone()).collect();
                    let values = chunk
                        .iter()
                        .map(|doc| serde_json::to_vec(doc).map_err(Into::into))
                        .collect::<Result<Vec<_>>>()?;
                    handles.docs.batch(&keys, &values)
                },
            );
            mapped?;
            stored?;
        }

        let indexed = docs.len();
        if indexed > 0 {
            self.update_meta(|meta| {
                meta.doc_count += indexed as u64;
                for doc in &docs {
                    meta.observe(doc.timestamp);
                }
                meta.touch();
            })?;
        }

        let took = start.elapsed().as_millis() as u64;
        tracing::info!(
            index = self.name(),
            documents = indexed,
            batch_size,
            took_ms = took,
            "bulk indexed documents"
        );
        Ok(BulkSummary { indexed, took })
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

    fn make_index(temp_dir: &TempDir, batch_size: usize) -> Index {
        let config = Arc::new(EngineConfig::new(temp_dir.path()).with_bulk_batch_size(batch_size));
        let meta_store = StorageKind::Snapshot.open(config.metadata_path()).unwrap();
        let meta = IndexMeta::new("bulk", StorageKind::Log, TokenizerKind::Standard, InvertedMode::Sync, 4);
        Index::new(config, meta_store, meta)
    }

    #[test]
    fn test_bulk_counts_and_maps() {
        let temp_dir = TempDir::new().unwrap();
        let index = make_index(&temp_dir, 3);

        let docs: Vec<Document> = (0..10)
            .map(|i| Document::from_value(format!("d{i}"), json!({"n": format!("item{i} common")})).unwrap())
            .collect();
        let summary = index.bulk_documents(docs).unwrap();

        assert_eq!(summary.indexed, 10);
        assert_eq!(index.doc_count(), 10);
        let handles = index.handles().unwrap();
        assert_eq!(handles.inverted.get_ids("common").unwrap().len(), 10);
        assert_eq!(handles.inverted.get_ids("item4").unwrap(), vec!["d4"]);
        assert!(index.meta().doc_time_min.is_some());
    }

    #[test]
    fn test_empty_bulk() {
        let temp_dir = TempDir::new().unwrap();
        let index = make_index(&temp_dir, 3);
        let summary = index.bulk_documents(Vec::new()).unwrap();
        assert_eq!(summary.indexed, 0);
        assert_eq!(index.doc_count(), 0);
    }
}

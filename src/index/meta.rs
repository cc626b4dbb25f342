//! Persistent index metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::TokenizerKind;
use crate::error::Result;
use crate::inverted::InvertedMode;
use crate::storage::{KvStore, StorageKind};

/// Everything needed to reopen an index, plus its document statistics.
///
/// Stored as JSON in the engine's metadata store under the index name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub storage_kind: StorageKind,
    pub tokenizer_kind: TokenizerKind,
    #[serde(default)]
    pub inverted_mode: InvertedMode,
    pub number_of_shards: usize,
    pub doc_count: u64,
    /// Earliest document timestamp seen.
    pub doc_time_min: Option<DateTime<Utc>>,
    /// Latest document timestamp seen.
    pub doc_time_max: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Opaque mapping supplied at creation, returned as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
}

impl IndexMeta {
    pub fn new(
        name: &str,
        storage_kind: StorageKind,
        tokenizer_kind: TokenizerKind,
        inverted_mode: InvertedMode,
        number_of_shards: usize,
    ) -> Self {
        let now = Utc::now();
        IndexMeta {
            name: name.to_string(),
            storage_kind,
            tokenizer_kind,
            inverted_mode,
            number_of_shards,
            doc_count: 0,
            doc_time_min: None,
            doc_time_max: None,
            created_at: now,
            updated_at: now,
            mapping: None,
        }
    }

    pub fn load(store: &dyn KvStore, name: &str) -> Result<Option<Self>> {
        match store.get(name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, store: &dyn KvStore) -> Result<()> {
        store.set(&self.name, &serde_json::to_vec(self)?)
    }

    /// Every index recorded in `store`, sorted by name.
    pub fn list(store: &dyn KvStore) -> Result<Vec<Self>> {
        let mut metas = store
            .list()?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(Into::into))
            .collect::<Result<Vec<IndexMeta>>>()?;
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    /// Widen the document time bounds to include `timestamp`.
    pub fn observe(&mut self, timestamp: DateTime<Utc>) {
        self.doc_time_min = Some(self.doc_time_min.map_or(timestamp, |t| t.min(timestamp)));
        self.doc_time_max = Some(self.doc_time_max.map_or(timestamp, |t| t.max(timestamp)));
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_observe_widens_bounds() {
        let mut meta = IndexMeta::new(
            "logs",
            StorageKind::Log,
            TokenizerKind::Standard,
            InvertedMode::Sync,
            2,
        );
        let early = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let middle = Utc.with_ymd_and_hms(2022, 3, 3, 3, 3, 3).unwrap();

        meta.observe(middle);
        assert_eq!(meta.doc_time_min, Some(middle));
        meta.observe(late);
        meta.observe(early);
        assert_eq!(meta.doc_time_min, Some(early));
        assert_eq!(meta.doc_time_max, Some(late));
    }

    #[test]
    fn test_save_load_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = StorageKind::Snapshot.open(temp_dir.path().join("meta")).unwrap();

        for name in ["zeta", "alpha"] {
            IndexMeta::new(name, StorageKind::Log, TokenizerKind::Jieba, InvertedMode::Async, 3)
                .save(store.as_ref())
                .unwrap();
        }

        let loaded = IndexMeta::load(store.as_ref(), "alpha").unwrap().unwrap();
        assert_eq!(loaded.tokenizer_kind, TokenizerKind::Jieba);
        assert_eq!(loaded.inverted_mode, InvertedMode::Async);
        assert!(IndexMeta::load(store.as_ref(), "missing").unwrap().is_none());

        let names: Vec<String> = IndexMeta::list(store.as_ref())
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}

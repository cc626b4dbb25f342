//! The engine: registry of indices and entry point of the library.
//!
//! # Example
//!
//! ```
//! use quarry::config::EngineConfig;
//! use quarry::document::Document;
//! use quarry::engine::Engine;
//! use quarry::search::SearchOptions;
//! use serde_json::json;
//!
//! # fn main() -> quarry::error::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let engine = Engine::open(EngineConfig::new(dir.path()).with_number_of_shards(2))?;
//!
//! let books = engine.get_or_create_index("books")?;
//! books.index_document(Document::from_value("1", json!({"title": "The Rust Programming Language"}))?)?;
//!
//! let result = books.search(&SearchOptions::new("rust"))?;
//! assert_eq!(result.hits.hits[0].id, "1");
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::analysis::TokenizerKind;
use crate::bulk::{BulkResponse, parse_bulk};
use crate::config::EngineConfig;
use crate::error::{QuarryError, Result};
use crate::index::{Index, IndexInfo, IndexMeta};
use crate::inverted::InvertedMode;
use crate::storage::{KvStore, StorageKind};

/// Settings of a new index. Unset fields fall back to the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateIndexOptions {
    pub number_of_shards: Option<usize>,
    pub storage: Option<StorageKind>,
    pub tokenizer: Option<TokenizerKind>,
    pub inverted_mode: Option<InvertedMode>,
    pub mapping: Option<Value>,
}

/// Owns the metadata store and every index opened through it.
#[derive(Debug)]
pub struct Engine {
    config: Arc<EngineConfig>,
    meta: Arc<dyn KvStore>,
    indices: RwLock<HashMap<String, Arc<Index>>>,
    /// Targets of clones whose files are still being copied.
    cloning: Mutex<HashSet<String>>,
}

/// Holds a clone target name until the clone finishes or fails.
struct CloneReservation<'a> {
    cloning: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for CloneReservation<'_> {
    fn drop(&mut self) {
        self.cloning.lock().remove(&self.name);
    }
}

impl Engine {
    /// Open the engine rooted at `config.data_dir`, creating it if needed.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.indices_dir())?;
        let meta = config.meta_storage.open(config.metadata_path())?;
        tracing::info!(data_dir = %config.data_dir.display(), "opened engine");

        Ok(Engine {
            config: Arc::new(config),
            meta,
            indices: RwLock::new(HashMap::new()),
            cloning: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a new index and open it.
    pub fn create_index(&self, name: &str, options: CreateIndexOptions) -> Result<Arc<Index>> {
        validate_index_name(name)?;
        let mut indices = self.indices.write();
        if self.is_taken(&indices, name)? {
            return Err(QuarryError::IndexAlreadyExists(name.to_string()));
        }
        remove_orphan_dir(&self.config.indices_dir().join(name))?;

        let mut meta = IndexMeta::new(
            name,
            options.storage.unwrap_or(self.config.default_storage),
            options.tokenizer.unwrap_or(self.config.default_tokenizer),
            options.inverted_mode.unwrap_or(self.config.inverted.mode),
            match options.number_of_shards {
                Some(0) | None => self.config.default_number_of_shards,
                Some(n) => n,
            },
        );
        meta.mapping = options.mapping;
        meta.save(self.meta.as_ref())?;

        let index = Arc::new(Index::new(
            Arc::clone(&self.config),
            Arc::clone(&self.meta),
            meta,
        ));
        index.open()?;
        indices.insert(name.to_string(), Arc::clone(&index));
        tracing::info!(index = name, "created index");
        Ok(index)
    }

    /// Get an existing index, opening it from its metadata if it is not
    /// registered yet.
    pub fn get_index(&self, name: &str) -> Result<Arc<Index>> {
        if let Some(index) = self.indices.read().get(name) {
            return Ok(Arc::clone(index));
        }

        let mut indices = self.indices.write();
        if let Some(index) = indices.get(name) {
            return Ok(Arc::clone(index));
        }
        let meta = IndexMeta::load(self.meta.as_ref(), name)?
            .ok_or_else(|| QuarryError::IndexNotFound(name.to_string()))?;
        let index = Arc::new(Index::new(
            Arc::clone(&self.config),
            Arc::clone(&self.meta),
            meta,
        ));
        index.open()?;
        indices.insert(name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Get an index, creating it with default settings if it does not exist.
    pub fn get_or_create_index(&self, name: &str) -> Result<Arc<Index>> {
        match self.get_index(name) {
            Err(QuarryError::IndexNotFound(_)) => {
                match self.create_index(name, CreateIndexOptions::default()) {
                    // Lost a race with another creator.
                    Err(QuarryError::IndexAlreadyExists(_)) => self.get_index(name),
                    other => other,
                }
            }
            other => other,
        }
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.indices.read().contains_key(name)
            || IndexMeta::load(self.meta.as_ref(), name)?.is_some())
    }

    /// Every known index, sorted by name.
    pub fn list_indices(&self) -> Result<Vec<IndexInfo>> {
        let indices = self.indices.read();
        Ok(IndexMeta::list(self.meta.as_ref())?
            .into_iter()
            .map(|meta| match indices.get(&meta.name) {
                Some(index) => index.info(),
                None => IndexInfo {
                    state: crate::index::IndexState::Closed,
                    meta,
                },
            })
            .collect())
    }

    pub fn open_index(&self, name: &str) -> Result<Arc<Index>> {
        let index = self.get_index(name)?;
        index.open()?;
        Ok(index)
    }

    /// Close an index and drop it from the registry. Its data stays on disk.
    pub fn close_index(&self, name: &str) -> Result<()> {
        let removed = self.indices.write().remove(name);
        match removed {
            Some(index) => index.close(),
            None if self.exists(name)? => Ok(()),
            None => Err(QuarryError::IndexNotFound(name.to_string())),
        }
    }

    /// Delete an index with all its documents.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        let index = self.get_index(name)?;
        self.indices.write().remove(name);
        index.destroy()?;
        self.meta.delete(name)?;
        tracing::info!(index = name, "deleted index");
        Ok(())
    }

    /// Copy `source` into a new index named `target`.
    ///
    /// The registry stays available while the files are copied. A failed
    /// clone leaves neither files nor metadata behind.
    pub fn clone_index(&self, source: &str, target: &str) -> Result<Arc<Index>> {
        if source == target {
            return Err(QuarryError::CloneSameName(source.to_string()));
        }
        validate_index_name(target)?;
        let source_index = self.get_index(source)?;
        let target_dir = self.config.indices_dir().join(target);

        let _reservation = {
            let indices = self.indices.read();
            if self.is_taken(&indices, target)? {
                return Err(QuarryError::IndexAlreadyExists(target.to_string()));
            }
            if target_dir.exists() && !target_dir.is_dir() {
                return Err(QuarryError::CloneUnsupported(format!(
                    "'{}' is not a directory",
                    target_dir.display()
                )));
            }
            let mut cloning = self.cloning.lock();
            if !cloning.insert(target.to_string()) {
                return Err(QuarryError::IndexAlreadyExists(target.to_string()));
            }
            CloneReservation {
                cloning: &self.cloning,
                name: target.to_string(),
            }
        };

        match self.populate_clone(&source_index, target, &target_dir) {
            Ok(index) => {
                tracing::info!(source, target, "cloned index");
                Ok(index)
            }
            Err(e) => {
                tracing::warn!(source, target, error = %e, "clone failed, removing partial copy");
                if let Err(cleanup) = self.meta.delete(target) {
                    tracing::error!(target, error = %cleanup, "failed to remove clone metadata");
                }
                if target_dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&target_dir) {
                        tracing::error!(target, error = %cleanup, "failed to remove clone files");
                    }
                }
                Err(e)
            }
        }
    }

    /// Copy the files and metadata of `source` and register the clone.
    fn populate_clone(&self, source: &Index, target: &str, target_dir: &Path) -> Result<Arc<Index>> {
        remove_orphan_dir(target_dir)?;
        fs::create_dir_all(target_dir)?;
        source.flush()?;
        source.copy_to(target_dir)?;

        let mut meta = source.meta();
        let now = chrono::Utc::now();
        meta.name = target.to_string();
        meta.created_at = now;
        meta.updated_at = now;

        let index = Arc::new(Index::new(
            Arc::clone(&self.config),
            Arc::clone(&self.meta),
            meta.clone(),
        ));
        index.open()?;

        let mut indices = self.indices.write();
        if let Err(e) = meta.save(self.meta.as_ref()) {
            drop(indices);
            if let Err(close) = index.close() {
                tracing::warn!(index = target, error = %close, "failed to close unsaved clone");
            }
            return Err(e);
        }
        indices.insert(target.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Apply a newline-delimited bulk body. Items without an `_index` go to
    /// `default_index`.
    pub fn bulk<R: BufRead>(&self, default_index: Option<&str>, reader: R) -> Result<BulkResponse> {
        let items = parse_bulk(reader)?;
        crate::bulk::execute(self, default_index, items)
    }

    /// Close every index, then the metadata store.
    pub fn shutdown(&self) -> Result<()> {
        let indices: Vec<Arc<Index>> = self.indices.write().drain().map(|(_, i)| i).collect();
        let mut first_error = None;
        for index in indices {
            if let Err(e) = index.close() {
                tracing::error!(index = index.name(), error = %e, "failed to close index");
                first_error.get_or_insert(e);
            }
        }
        self.meta.close()?;
        tracing::info!("engine shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Engine {
    /// Whether `name` is registered, has metadata or is being cloned into.
    fn is_taken(&self, indices: &HashMap<String, Arc<Index>>, name: &str) -> Result<bool> {
        Ok(indices.contains_key(name)
            || self.cloning.lock().contains(name)
            || IndexMeta::load(self.meta.as_ref(), name)?.is_some())
    }
}

/// Remove index files left behind without metadata, e.g. by a crash during
/// a clone.
fn remove_orphan_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "removing files of unknown index");
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Index names become directory names and metadata keys.
fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(QuarryError::invalid_argument("index name cannot be empty"));
    }
    if name.starts_with('_') || name.starts_with('.') {
        return Err(QuarryError::invalid_argument(format!(
            "index name '{name}' cannot start with '_' or '.'"
        )));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control()) {
        return Err(QuarryError::invalid_argument(format!(
            "index name '{name}' contains an invalid character"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_index_name() {
        assert!(validate_index_name("logs-2024").is_ok());
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("_system").is_err());
        assert!(validate_index_name("a/b").is_err());
        assert!(validate_index_name("has space").is_err());
    }

    #[test]
    fn test_create_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig::new(temp_dir.path()).with_number_of_shards(2)).unwrap();
        engine.create_index("a", CreateIndexOptions::default()).unwrap();
        assert!(matches!(
            engine.create_index("a", CreateIndexOptions::default()),
            Err(QuarryError::IndexAlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_options_override_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig::new(temp_dir.path())).unwrap();
        let index = engine
            .create_index(
                "custom",
                CreateIndexOptions {
                    number_of_shards: Some(3),
                    storage: Some(StorageKind::Snapshot),
                    tokenizer: Some(TokenizerKind::Jieba),
                    inverted_mode: Some(InvertedMode::Async),
                    mapping: Some(serde_json::json!({"properties": {}})),
                },
            )
            .unwrap();

        let meta = index.meta();
        assert_eq!(meta.number_of_shards, 3);
        assert_eq!(meta.storage_kind, StorageKind::Snapshot);
        assert_eq!(meta.tokenizer_kind, TokenizerKind::Jieba);
        assert_eq!(meta.inverted_mode, InvertedMode::Async);
        assert!(meta.mapping.is_some());
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_failed_clone_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig::new(temp_dir.path()).with_number_of_shards(2)).unwrap();
        let source = engine.create_index("src", CreateIndexOptions::default()).unwrap();
        source
            .index_document(crate::document::Document::from_value("1", serde_json::json!({"a": "b"})).unwrap())
            .unwrap();
        // Still registered, but its files are gone.
        source.destroy().unwrap();

        assert!(matches!(
            engine.clone_index("src", "copy"),
            Err(QuarryError::IndexClosed(_))
        ));
        assert!(!engine.config().indices_dir().join("copy").exists());
        assert!(!engine.exists("copy").unwrap());
        assert!(engine.cloning.lock().is_empty());

        // The name is free for a later clone.
        engine.create_index("other", CreateIndexOptions::default()).unwrap();
        engine.clone_index("other", "copy").unwrap();
        assert!(engine.exists("copy").unwrap());
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_missing_index() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(EngineConfig::new(temp_dir.path())).unwrap();
        assert!(matches!(engine.get_index("nope"), Err(QuarryError::IndexNotFound(_))));
        assert!(matches!(engine.close_index("nope"), Err(QuarryError::IndexNotFound(_))));
        assert!(matches!(
            engine.clone_index("nope", "nope"),
            Err(QuarryError::CloneSameName(_))
        ));
    }
}

//! Indices: the unit of isolation.
//!
//! An [`Index`] owns two shard routers under `{data_dir}/indices/{name}/`:
//! `docs_{i}` holds the JSON documents keyed by id and `inverted_{i}` holds
//! the keyword lists. Together with the tokenizer they form the index's
//! handles, which are opened lazily on first use and released by
//! [`Index::close`].
//!
//! Document operations live in [`documents`], the bulk executor in [`bulk`]
//! and the search algorithm in [`crate::search`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::analysis::Tokenizer;
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{QuarryError, Result};
use crate::inverted::InvertedIndex;
use crate::shard::ShardRouter;
use crate::storage::KvStore;

pub mod bulk;
pub mod documents;
pub mod meta;

pub use bulk::BulkSummary;
pub use documents::IndexOutcome;
pub use meta::IndexMeta;

const DOCS_NAME: &str = "docs";
const INVERTED_NAME: &str = "inverted";

/// Whether an index currently holds open storage handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Closed,
    Open,
}

/// Snapshot of an index's state and metadata.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub state: IndexState,
    #[serde(flatten)]
    pub meta: IndexMeta,
}

/// The storage, inverted engine and tokenizer of an open index.
#[derive(Debug)]
pub(crate) struct IndexHandles {
    pub(crate) docs: ShardRouter,
    pub(crate) inverted: Box<dyn InvertedIndex>,
    pub(crate) tokenizer: Arc<dyn Tokenizer>,
    /// One lock per document shard; single-document writes to the same id
    /// are serialized through it.
    doc_locks: Vec<Mutex<()>>,
}

impl IndexHandles {
    pub(crate) fn lock_doc(&self, id: &str) -> MutexGuard<'_, ()> {
        self.doc_locks[self.docs.shard_for(id)].lock()
    }

    pub(crate) fn load_document(&self, id: &str) -> Result<Option<Document>> {
        match self.docs.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// A named index.
#[derive(Debug)]
pub struct Index {
    name: String,
    dir: PathBuf,
    config: Arc<EngineConfig>,
    meta_store: Arc<dyn KvStore>,
    meta: RwLock<IndexMeta>,
    handles: RwLock<Option<Arc<IndexHandles>>>,
    dropped: AtomicBool,
}

impl Index {
    /// Wrap persisted metadata. The index starts closed.
    pub(crate) fn new(config: Arc<EngineConfig>, meta_store: Arc<dyn KvStore>, meta: IndexMeta) -> Self {
        Index {
            name: meta.name.clone(),
            dir: config.indices_dir().join(&meta.name),
            config,
            meta_store,
            meta: RwLock::new(meta),
            handles: RwLock::new(None),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the index's shards.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> IndexState {
        if self.handles.read().is_some() {
            IndexState::Open
        } else {
            IndexState::Closed
        }
    }

    /// A copy of the current metadata.
    pub fn meta(&self) -> IndexMeta {
        self.meta.read().clone()
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            state: self.state(),
            meta: self.meta(),
        }
    }

    /// Number of documents, as tracked by the metadata.
    pub fn doc_count(&self) -> u64 {
        self.meta.read().doc_count
    }

    /// Open the storage handles. Opening an open index does nothing.
    ///
    /// The document count is re-established from the shards, so a crash
    /// between a document write and the metadata write heals on reopen.
    pub fn open(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(QuarryError::IndexClosed(self.name.clone()));
        }
        let mut slot = self.handles.write();
        if slot.is_some() {
            return Ok(());
        }

        let (kind, tokenizer_kind, mode, shards) = {
            let meta = self.meta.read();
            (
                meta.storage_kind,
                meta.tokenizer_kind,
                meta.inverted_mode,
                meta.number_of_shards,
            )
        };

        let docs = ShardRouter::open(&self.dir, DOCS_NAME, kind, shards)?;
        let inverted = match ShardRouter::open(&self.dir, INVERTED_NAME, kind, shards)
            .and_then(|router| mode.open(router, &self.config.inverted))
        {
            Ok(inverted) => inverted,
            Err(e) => {
                let _ = docs.close();
                return Err(e);
            }
        };
        if let Err(e) = self.reconcile_doc_count(&docs) {
            let _ = inverted.close();
            let _ = docs.close();
            return Err(e);
        }
        let doc_locks = (0..docs.shard_count()).map(|_| Mutex::new(())).collect();

        *slot = Some(Arc::new(IndexHandles {
            docs,
            inverted,
            tokenizer: tokenizer_kind.build(),
            doc_locks,
        }));
        tracing::info!(index = %self.name, shards, %kind, %mode, "opened index");
        Ok(())
    }

    /// Make `doc_count` match the documents actually stored.
    fn reconcile_doc_count(&self, docs: &ShardRouter) -> Result<()> {
        let stored = docs.count()? as u64;
        let mut meta = self.meta.write();
        if meta.doc_count != stored {
            tracing::warn!(
                index = %self.name,
                recorded = meta.doc_count,
                stored,
                "document count out of sync, using stored count"
            );
            meta.doc_count = stored;
            meta.save(self.meta_store.as_ref())?;
        }
        Ok(())
    }

    /// Persist metadata, drain the inverted engine and close both routers.
    /// Closing a closed index does nothing.
    pub fn close(&self) -> Result<()> {
        let Some(handles) = self.handles.write().take() else {
            return Ok(());
        };

        let saved = self.meta.read().save(self.meta_store.as_ref());
        let drained = handles.inverted.close();
        let closed = handles.docs.close();
        tracing::info!(index = %self.name, "closed index");
        saved.and(drained).and(closed)
    }

    /// Handles of the index, opening it first if needed.
    pub(crate) fn handles(&self) -> Result<Arc<IndexHandles>> {
        if let Some(handles) = self.handles.read().as_ref() {
            return Ok(Arc::clone(handles));
        }
        self.open()?;
        self.handles
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| QuarryError::IndexClosed(self.name.clone()))
    }

    /// Apply pending inverted-index work and persist the metadata.
    pub fn flush(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(QuarryError::IndexClosed(self.name.clone()));
        }
        let handles = self.handles.read().clone();
        if let Some(handles) = handles {
            handles.inverted.flush()?;
        }
        self.meta.read().save(self.meta_store.as_ref())
    }

    /// Change the metadata under the write lock and persist it.
    pub(crate) fn update_meta<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut IndexMeta),
    {
        let mut meta = self.meta.write();
        f(&mut meta);
        meta.save(self.meta_store.as_ref())
    }

    /// Copy both routers into `dir` so that an index opened there sees the
    /// same documents and keyword lists.
    pub(crate) fn copy_to(&self, dir: &Path) -> Result<()> {
        let handles = self.handles()?;
        handles.inverted.clone_to(dir)?;
        handles.docs.clone_to(dir)
    }

    /// Close the index for good and remove its files. Any later use fails
    /// with [`QuarryError::IndexClosed`].
    pub(crate) fn destroy(&self) -> Result<()> {
        self.dropped.store(true, Ordering::Release);
        self.close()?;
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

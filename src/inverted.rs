//! Keyword to document-id mapping.
//!
//! For every keyword the inverted index keeps the ordered, duplicate-free list
//! of ids of the documents containing it. Lists are stored bincode-encoded in
//! a [`ShardRouter`] keyed by the keyword, so the shard owning a keyword is
//! `shard_of(keyword)`.
//!
//! Two engines share the [`InvertedIndex`] interface:
//!
//! - [`SyncInvertedIndex`] applies every mutation before returning.
//! - [`AsyncInvertedIndex`] hands mutations to one worker thread per shard and
//!   serves reads through a TTL cache; reads may lag until the queues drain.
//!
//! Mutations of one list are serialized through the owning shard in both
//! engines, so concurrent writers never lose each other's updates.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::InvertedConfig;
use crate::error::{QuarryError, Result};
use crate::shard::ShardRouter;
use crate::storage::KvStore;

pub mod sync;
pub mod worker;

pub use sync::SyncInvertedIndex;
pub use worker::AsyncInvertedIndex;

/// Maintains keyword to document-id lists.
pub trait InvertedIndex: Send + Sync + fmt::Debug {
    /// Add `doc_id` to the list of every keyword. Empty keywords are ignored.
    fn map_keywords(&self, keywords: &[String], doc_id: &str) -> Result<()>;

    /// Remove `doc_id` from the list of every keyword. Keywords that were
    /// never mapped are left absent.
    fn unmap_keywords(&self, keywords: &[String], doc_id: &str) -> Result<()>;

    /// Ids of the documents containing `keyword`, empty if it is unknown.
    fn get_ids(&self, keyword: &str) -> Result<Vec<String>>;

    /// Wait until every mutation issued before this call has been applied.
    fn flush(&self) -> Result<()>;

    /// Apply pending work and release the storage.
    fn close(&self) -> Result<()>;

    /// The router holding the lists.
    fn router(&self) -> &ShardRouter;

    fn mode(&self) -> InvertedMode;

    /// Copy the lists to `dir` after applying pending work.
    fn clone_to(&self, dir: &Path) -> Result<()> {
        self.flush()?;
        self.router().clone_to(dir)
    }
}

/// Tag selecting an [`InvertedIndex`] engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvertedMode {
    #[default]
    Sync,
    Async,
}

impl InvertedMode {
    /// Build the engine of this mode on top of `router`.
    pub fn open(self, router: ShardRouter, config: &InvertedConfig) -> Result<Box<dyn InvertedIndex>> {
        match self {
            InvertedMode::Sync => Ok(Box::new(SyncInvertedIndex::new(router))),
            InvertedMode::Async => Ok(Box::new(AsyncInvertedIndex::start(
                Arc::new(router),
                config.queue_capacity,
                config.cache_ttl(),
            )?)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvertedMode::Sync => "sync",
            InvertedMode::Async => "async",
        }
    }
}

impl fmt::Display for InvertedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvertedMode {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(InvertedMode::Sync),
            "async" => Ok(InvertedMode::Async),
            other => Err(QuarryError::invalid_argument(format!(
                "unknown inverted index mode '{other}'"
            ))),
        }
    }
}

/// Direction of a list mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Add,
    Remove,
}

/// Apply `op` for `doc_id` to `ids`. Returns whether the list changed.
pub(crate) fn apply(op: MutationOp, ids: &mut Vec<String>, doc_id: &str) -> bool {
    let position = ids.iter().position(|id| id == doc_id);
    match (op, position) {
        (MutationOp::Add, None) => {
            ids.push(doc_id.to_string());
            true
        }
        (MutationOp::Remove, Some(pos)) => {
            ids.remove(pos);
            true
        }
        _ => false,
    }
}

pub(crate) fn encode_ids(ids: &[String]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(ids)?)
}

pub(crate) fn decode_ids(bytes: &[u8]) -> Result<Vec<String>> {
    bincode::deserialize(bytes)
        .map_err(|e| QuarryError::corrupted(format!("invalid inverted list: {e}")))
}

/// Read the stored list of `keyword` from `router`, `None` if absent.
pub(crate) fn load_ids(router: &ShardRouter, keyword: &str) -> Result<Option<Vec<String>>> {
    router.get(keyword)?.map(|bytes| decode_ids(&bytes)).transpose()
}

/// Drop empty keywords and duplicates, keeping the first occurrence.
pub(crate) fn distinct_keywords(keywords: &[String]) -> Vec<&str> {
    let mut seen = ahash::AHashSet::new();
    keywords
        .iter()
        .map(String::as_str)
        .filter(|k| !k.is_empty() && seen.insert(*k))
        .collect()
}

//! Synchronous inverted index.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::inverted::{
    InvertedIndex, InvertedMode, MutationOp, apply, distinct_keywords, encode_ids, load_ids,
};
use crate::shard::ShardRouter;
use crate::storage::KvStore;

/// Applies mutations in the caller's thread.
///
/// The keywords of a call are grouped by shard. Each group is a
/// read-modify-write under the shard's mutex, finished by a single batch
/// write, so two callers touching the same keyword are linearized.
#[derive(Debug)]
pub struct SyncInvertedIndex {
    router: ShardRouter,
    locks: Vec<Mutex<()>>,
}

impl SyncInvertedIndex {
    pub fn new(router: ShardRouter) -> Self {
        let locks = (0..router.shard_count()).map(|_| Mutex::new(())).collect();
        SyncInvertedIndex { router, locks }
    }

    fn mutate(&self, op: MutationOp, keywords: &[String], doc_id: &str) -> Result<()> {
        let mut by_shard: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for keyword in distinct_keywords(keywords) {
            by_shard
                .entry(self.router.shard_for(keyword))
                .or_default()
                .push(keyword);
        }

        for (shard_id, group) in by_shard {
            let shard = self.router.shard(shard_id)?;
            let _guard = self.locks[shard_id].lock();

            let mut keys = Vec::with_capacity(group.len());
            let mut values = Vec::with_capacity(group.len());
            for keyword in group {
                let stored = load_ids(&self.router, keyword)?;
                // Unmapping a keyword that was never mapped must not create it.
                if stored.is_none() && op == MutationOp::Remove {
                    continue;
                }
                let mut ids = stored.unwrap_or_default();
                if apply(op, &mut ids, doc_id) {
                    keys.push(keyword.to_string());
                    values.push(encode_ids(&ids)?);
                }
            }
            if !keys.is_empty() {
                shard.batch(&keys, &values)?;
            }
        }
        Ok(())
    }
}

impl InvertedIndex for SyncInvertedIndex {
    fn map_keywords(&self, keywords: &[String], doc_id: &str) -> Result<()> {
        self.mutate(MutationOp::Add, keywords, doc_id)
    }

    fn unmap_keywords(&self, keywords: &[String], doc_id: &str) -> Result<()> {
        self.mutate(MutationOp::Remove, keywords, doc_id)
    }

    fn get_ids(&self, keyword: &str) -> Result<Vec<String>> {
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        Ok(load_ids(&self.router, keyword)?.unwrap_or_default())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.router.close()
    }

    fn router(&self) -> &ShardRouter {
        &self.router
    }

    fn mode(&self) -> InvertedMode {
        InvertedMode::Sync
    }
}

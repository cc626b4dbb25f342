//! Asynchronous inverted index backed by per-shard worker threads.
//!
//! Each shard of the router has one named worker thread reading a bounded
//! queue. A mutation is split by shard and enqueued on every touched shard's
//! queue, so all changes to one keyword are applied in order by a single
//! thread. Workers keep recently written lists in a shared [`TtlCache`];
//! readers consult the cache and then the shard, but never fill the cache, so
//! a stale read cannot overwrite a newer list.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use crate::cache::TtlCache;
use crate::error::{QuarryError, Result};
use crate::inverted::{
    InvertedIndex, InvertedMode, MutationOp, apply, distinct_keywords, encode_ids, load_ids,
};
use crate::shard::ShardRouter;
use crate::storage::KvStore;

/// Lower bound on how often workers sweep the cache.
const MIN_PURGE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Mutation {
    op: MutationOp,
    keywords: Vec<String>,
    doc_id: String,
}

#[derive(Debug)]
enum ShardRequest {
    Mutate(Mutation),
    /// Acknowledge once every earlier request has been handled.
    Flush(Sender<()>),
    /// Acknowledge, then exit.
    Stop(Sender<()>),
}

/// Inverted index whose writes are applied by background workers.
#[derive(Debug)]
pub struct AsyncInvertedIndex {
    router: Arc<ShardRouter>,
    cache: Arc<TtlCache<Vec<String>>>,
    senders: Vec<Sender<ShardRequest>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// First error hit by any worker since the last flush.
    failure: Arc<Mutex<Option<String>>>,
    closed: AtomicBool,
}

impl AsyncInvertedIndex {
    /// Spawn one worker per shard of `router`.
    pub fn start(router: Arc<ShardRouter>, queue_capacity: usize, cache_ttl: Duration) -> Result<Self> {
        let cache = Arc::new(TtlCache::new(cache_ttl));
        let failure = Arc::new(Mutex::new(None));
        let mut senders = Vec::with_capacity(router.shard_count());
        let mut workers = Vec::with_capacity(router.shard_count());

        for shard_id in 0..router.shard_count() {
            let (tx, rx) = bounded(queue_capacity.max(1));
            let worker = ShardWorker {
                shard_id,
                router: Arc::clone(&router),
                cache: Arc::clone(&cache),
                failure: Arc::clone(&failure),
            };
            let handle = thread::Builder::new()
                .name(format!("quarry-inverted-{shard_id}"))
                .spawn(move || worker.run(rx))?;
            senders.push(tx);
            workers.push(handle);
        }

        tracing::debug!(
            logical_name = router.logical_name(),
            workers = workers.len(),
            queue_capacity,
            "started inverted index workers"
        );

        Ok(AsyncInvertedIndex {
            router,
            cache,
            senders,
            workers: Mutex::new(workers),
            failure,
            closed: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, op: MutationOp, keywords: &[String], doc_id: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuarryError::StorageClosed);
        }

        let mut by_shard: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for keyword in distinct_keywords(keywords) {
            by_shard
                .entry(self.router.shard_for(keyword))
                .or_default()
                .push(keyword.to_string());
        }

        for (shard_id, keywords) in by_shard {
            let request = ShardRequest::Mutate(Mutation {
                op,
                keywords,
                doc_id: doc_id.to_string(),
            });
            self.senders[shard_id]
                .send(request)
                .map_err(|_| QuarryError::worker(format!("inverted worker {shard_id} is gone")))?;
        }
        Ok(())
    }

    /// Send one acknowledged request to every worker and wait for all acks.
    fn broadcast(&self, make: fn(Sender<()>) -> ShardRequest) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(self.senders.len());
        for (shard_id, sender) in self.senders.iter().enumerate() {
            sender
                .send(make(ack_tx.clone()))
                .map_err(|_| QuarryError::worker(format!("inverted worker {shard_id} is gone")))?;
        }
        drop(ack_tx);
        for _ in 0..self.senders.len() {
            ack_rx
                .recv()
                .map_err(|_| QuarryError::worker("inverted worker exited without acknowledging"))?;
        }
        Ok(())
    }

    fn take_failure(&self) -> Result<()> {
        match self.failure.lock().take() {
            Some(message) => Err(QuarryError::worker(message)),
            None => Ok(()),
        }
    }

    /// Number of cached keyword lists.
    pub fn cached_lists(&self) -> usize {
        self.cache.len()
    }
}

impl InvertedIndex for AsyncInvertedIndex {
    fn map_keywords(&self, keywords: &[String], doc_id: &str) -> Result<()> {
        self.enqueue(MutationOp::Add, keywords, doc_id)
    }

    fn unmap_keywords(&self, keywords: &[String], doc_id: &str) -> Result<()> {
        self.enqueue(MutationOp::Remove, keywords, doc_id)
    }

    fn get_ids(&self, keyword: &str) -> Result<Vec<String>> {
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(ids) = self.cache.get(keyword) {
            return Ok(ids);
        }
        Ok(load_ids(&self.router, keyword)?.unwrap_or_default())
    }

    fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuarryError::StorageClosed);
        }
        self.broadcast(ShardRequest::Flush)?;
        self.take_failure()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Queues are FIFO, so a worker acknowledges Stop only after applying
        // everything enqueued before it.
        let stopped = self.broadcast(ShardRequest::Stop);
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!("inverted index worker panicked");
            }
        }
        self.cache.clear();
        tracing::debug!(logical_name = self.router.logical_name(), "stopped inverted index workers");

        stopped?;
        self.router.close()?;
        self.take_failure()
    }

    fn router(&self) -> &ShardRouter {
        &self.router
    }

    fn mode(&self) -> InvertedMode {
        InvertedMode::Async
    }
}

struct ShardWorker {
    shard_id: usize,
    router: Arc<ShardRouter>,
    cache: Arc<TtlCache<Vec<String>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl ShardWorker {
    fn run(self, rx: Receiver<ShardRequest>) {
        // Expired lists are only dropped lazily on lookup, so every worker
        // also sweeps the shared cache once per TTL, idle or not.
        let tick = self.cache.ttl().max(MIN_PURGE_INTERVAL);
        let mut last_purge = Instant::now();

        loop {
            match rx.recv_timeout(tick) {
                Ok(request) => {
                    if !self.handle(request) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_purge.elapsed() >= tick {
                let purged = self.cache.purge_expired();
                if purged > 0 {
                    tracing::trace!(shard = self.shard_id, purged, "purged expired cache entries");
                }
                last_purge = Instant::now();
            }
        }
    }

    /// Handle one request. Returns `false` once the worker must exit.
    fn handle(&self, request: ShardRequest) -> bool {
        match request {
            ShardRequest::Mutate(mutation) => {
                if let Err(e) = self.apply_mutation(&mutation) {
                    tracing::error!(
                        shard = self.shard_id,
                        doc_id = %mutation.doc_id,
                        error = %e,
                        "failed to apply inverted index mutation"
                    );
                    self.failure.lock().get_or_insert_with(|| e.to_string());
                }
            }
            ShardRequest::Flush(ack) => {
                let _ = ack.send(());
            }
            ShardRequest::Stop(ack) => {
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn apply_mutation(&self, mutation: &Mutation) -> Result<()> {
        let mut updated = Vec::with_capacity(mutation.keywords.len());
        for keyword in &mutation.keywords {
            let stored = match self.cache.get(keyword) {
                Some(ids) => Some(ids),
                None => load_ids(&self.router, keyword)?,
            };
            if stored.is_none() && mutation.op == MutationOp::Remove {
                continue;
            }
            let mut ids = stored.unwrap_or_default();
            if apply(mutation.op, &mut ids, &mutation.doc_id) {
                updated.push((keyword.clone(), ids));
            }
        }
        if updated.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = updated.iter().map(|(k, _)| k.clone()).collect();
        let values = updated
            .iter()
            .map(|(_, ids)| encode_ids(ids))
            .collect::<Result<Vec<_>>>()?;
        self.router.shard(self.shard_id)?.batch(&keys, &values)?;

        for (keyword, ids) in updated {
            self.cache.insert(keyword, ids);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageKind;
    use tempfile::TempDir;

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn start(dir: &TempDir) -> AsyncInvertedIndex {
        let router = ShardRouter::open(dir.path(), "inverted", StorageKind::Log, 4).unwrap();
        AsyncInvertedIndex::start(Arc::new(router), 16, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn test_flush_applies_pending_mutations() {
        let temp_dir = TempDir::new().unwrap();
        let index = start(&temp_dir);

        for i in 0..50 {
            index
                .map_keywords(&keywords(&["alpha", "beta", "gamma"]), &i.to_string())
                .unwrap();
        }
        index.unmap_keywords(&keywords(&["beta"]), "7").unwrap();
        index.flush().unwrap();

        assert_eq!(index.get_ids("alpha").unwrap().len(), 50);
        assert_eq!(index.get_ids("beta").unwrap().len(), 49);
        assert!(!index.get_ids("beta").unwrap().contains(&"7".to_string()));
        assert!(index.cached_lists() >= 3);
        index.close().unwrap();
    }

    #[test]
    fn test_close_drains_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let index = start(&temp_dir);
            index.map_keywords(&keywords(&["durable"]), "1").unwrap();
            index.close().unwrap();
            assert!(matches!(
                index.map_keywords(&keywords(&["late"]), "2"),
                Err(QuarryError::StorageClosed)
            ));
            // Closing twice is harmless.
            index.close().unwrap();
        }

        let router = ShardRouter::open(temp_dir.path(), "inverted", StorageKind::Log, 4).unwrap();
        assert_eq!(load_ids(&router, "durable").unwrap(), Some(vec!["1".to_string()]));
    }

    #[test]
    fn test_expired_lists_are_purged() {
        let temp_dir = TempDir::new().unwrap();
        let router = ShardRouter::open(temp_dir.path(), "inverted", StorageKind::Log, 4).unwrap();
        let index = AsyncInvertedIndex::start(Arc::new(router), 64, Duration::from_millis(10)).unwrap();

        for i in 0..2000 {
            index.map_keywords(&keywords(&[format!("first{i}").as_str()]), "1").unwrap();
        }
        index.flush().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(index.cached_lists(), 0);

        for i in 0..2000 {
            index.map_keywords(&keywords(&[format!("second{i}").as_str()]), "1").unwrap();
        }
        index.flush().unwrap();
        assert!(index.cached_lists() <= 2000);
        // Purged lists are still served from storage.
        assert_eq!(index.get_ids("first7").unwrap(), vec!["1"]);
        index.close().unwrap();
    }

    #[test]
    fn test_readers_do_not_fill_cache() {
        let temp_dir = TempDir::new().unwrap();
        let index = start(&temp_dir);
        assert!(index.get_ids("nothing").unwrap().is_empty());
        assert_eq!(index.cached_lists(), 0);
        index.close().unwrap();
    }
}

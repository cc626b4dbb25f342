//! Shard routing over a set of key-value backends.
//!
//! A [`ShardRouter`] splits one logical database into `n` physical backends
//! named `{base}/{logical_name}_{i}`. Keys are assigned with [`shard_of`],
//! which treats the key bytes as one big-endian integer and reduces it modulo
//! `n`. The assignment depends on nothing but the bytes and the shard count,
//! so it is stable across restarts and across processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{QuarryError, Result};
use crate::storage::{KvStore, StorageKind, validate_batch};

/// Shard count used when a caller asks for zero shards.
pub const DEFAULT_SHARD_COUNT: usize = 10;

/// Map `key` to a shard in `0..shard_count`.
///
/// Equivalent to interpreting `key` as an unsigned big-endian integer and
/// taking it modulo `shard_count`, computed one byte at a time so keys of
/// any length are supported. An empty key maps to shard 0.
///
/// # Panics
///
/// Panics if `shard_count` is zero.
pub fn shard_of(key: &[u8], shard_count: usize) -> usize {
    assert!(shard_count > 0, "shard count must be positive");
    let modulus = shard_count as u128;
    let mut acc: u128 = 0;
    for &byte in key {
        acc = (acc * 256 + byte as u128) % modulus;
    }
    acc as usize
}

/// One logical key-value database spread over several backends.
#[derive(Debug)]
pub struct ShardRouter {
    logical_name: String,
    kind: StorageKind,
    shards: Vec<Arc<dyn KvStore>>,
}

impl ShardRouter {
    /// Open (or create) `shard_count` backends of `kind` under `base_path`.
    ///
    /// A `shard_count` of zero falls back to [`DEFAULT_SHARD_COUNT`].
    pub fn open<P: AsRef<Path>>(
        base_path: P,
        logical_name: &str,
        kind: StorageKind,
        shard_count: usize,
    ) -> Result<Self> {
        if logical_name.is_empty() {
            return Err(QuarryError::invalid_argument(
                "shard router needs a logical name",
            ));
        }
        let shard_count = if shard_count == 0 {
            DEFAULT_SHARD_COUNT
        } else {
            shard_count
        };

        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;

        let shards = (0..shard_count)
            .map(|i| kind.open(shard_path(&base_path, logical_name, i)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            base = %base_path.display(),
            logical_name,
            %kind,
            shard_count,
            "opened shard router"
        );

        Ok(ShardRouter {
            logical_name: logical_name.to_string(),
            kind,
            shards,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    /// Index of the shard owning `key`.
    pub fn shard_for(&self, key: &str) -> usize {
        shard_of(key.as_bytes(), self.shards.len())
    }

    /// The backend of shard `id`.
    pub fn shard(&self, id: usize) -> Result<&Arc<dyn KvStore>> {
        self.shards.get(id).ok_or_else(|| {
            QuarryError::invalid_argument(format!(
                "shard {id} out of range for {} shards",
                self.shards.len()
            ))
        })
    }

    fn route(&self, key: &str) -> &Arc<dyn KvStore> {
        &self.shards[self.shard_for(key)]
    }
}

impl KvStore for ShardRouter {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    fn list(&self) -> Result<Vec<Vec<u8>>> {
        let mut values = Vec::new();
        for shard in &self.shards {
            values.extend(shard.list()?);
        }
        Ok(values)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.route(key).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(QuarryError::EmptyKey);
        }
        self.route(key).set(key, value)
    }

    /// Group the pairs by shard and write every non-empty group with one
    /// backend batch call. Groups are written concurrently; the first failing
    /// shard aborts the call, while groups already written stay written.
    fn batch(&self, keys: &[String], values: &[Vec<u8>]) -> Result<()> {
        validate_batch(keys, values)?;

        let mut groups: Vec<(Vec<String>, Vec<Vec<u8>>)> =
            vec![(Vec::new(), Vec::new()); self.shards.len()];
        for (key, value) in keys.iter().zip(values) {
            let group = &mut groups[self.shard_for(key)];
            group.0.push(key.clone());
            group.1.push(value.clone());
        }

        groups
            .into_par_iter()
            .enumerate()
            .filter(|(_, (keys, _))| !keys.is_empty())
            .try_for_each(|(id, (keys, values))| self.shards[id].batch(&keys, &values))
    }

    fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(QuarryError::EmptyKey);
        }
        self.route(key).delete(key)
    }

    fn delete_all(&self) -> Result<()> {
        self.shards.par_iter().try_for_each(|shard| shard.delete_all())
    }

    /// Copy every shard to `dir/{logical_name}_{i}`, so that a router opened
    /// at `dir` with the same name and shard count sees the same contents.
    fn clone_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.shards
            .par_iter()
            .enumerate()
            .try_for_each(|(i, shard)| shard.clone_to(&shard_path(dir, &self.logical_name, i)))
    }

    fn close(&self) -> Result<()> {
        let mut first_error = None;
        for shard in &self.shards {
            if let Err(e) = shard.close() {
                tracing::error!(logical_name = %self.logical_name, error = %e, "failed to close shard");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn count(&self) -> Result<usize> {
        self.shards.iter().map(|shard| shard.count()).sum()
    }
}

fn shard_path(base: &Path, logical_name: &str, id: usize) -> PathBuf {
    base.join(format!("{logical_name}_{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shard_of_matches_big_endian_modulo() {
        assert_eq!(shard_of(b"", 7), 0);
        assert_eq!(shard_of(&[1, 0], 7), 256 % 7);
        assert_eq!(shard_of(b"ab", 10), (0x61 * 256 + 0x62) % 10);
        assert_eq!(shard_of(b"anything", 1), 0);

        // Long keys overflow any fixed-width integer but still reduce cleanly.
        let key = vec![0xffu8; 64];
        assert_eq!(shard_of(&key, 10), shard_of(&key, 10));
        assert!(shard_of(&key, 10) < 10);
    }

    #[test]
    fn test_zero_shards_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let router = ShardRouter::open(temp_dir.path(), "docs", StorageKind::Log, 0).unwrap();
        assert_eq!(router.shard_count(), DEFAULT_SHARD_COUNT);
        assert!(temp_dir.path().join("docs_9").exists());
    }

    #[test]
    fn test_routes_to_owning_shard() {
        let temp_dir = TempDir::new().unwrap();
        let router = ShardRouter::open(temp_dir.path(), "docs", StorageKind::Log, 4).unwrap();

        router.set("doc-1", b"one").unwrap();
        let owner = router.shard_for("doc-1");
        assert_eq!(
            router.shard(owner).unwrap().get("doc-1").unwrap(),
            Some(b"one".to_vec())
        );
        for other in (0..4).filter(|&i| i != owner) {
            assert_eq!(router.shard(other).unwrap().get("doc-1").unwrap(), None);
        }
    }

    #[test]
    fn test_batch_spreads_over_shards() {
        let temp_dir = TempDir::new().unwrap();
        let router =
            ShardRouter::open(temp_dir.path(), "inverted", StorageKind::Snapshot, 3).unwrap();

        let keys: Vec<String> = (0..30).map(|i| format!("key-{i}")).collect();
        let values: Vec<Vec<u8>> = (0..30).map(|i| vec![i as u8]).collect();
        router.batch(&keys, &values).unwrap();

        assert_eq!(router.count().unwrap(), 30);
        for (key, value) in keys.iter().zip(&values) {
            assert_eq!(router.get(key).unwrap().as_ref(), Some(value));
        }

        assert!(matches!(
            router.batch(&keys, &values[..1]),
            Err(QuarryError::KeyValueMismatch { .. })
        ));
    }

    #[test]
    fn test_clone_reopens_with_same_contents() {
        let temp_dir = TempDir::new().unwrap();
        let router = ShardRouter::open(temp_dir.path().join("a"), "docs", StorageKind::Log, 3)
            .unwrap();
        for i in 0..10 {
            router.set(&format!("k{i}"), b"v").unwrap();
        }

        let target = temp_dir.path().join("b");
        router.clone_to(&target).unwrap();
        let clone = ShardRouter::open(&target, "docs", StorageKind::Log, 3).unwrap();
        assert_eq!(clone.count().unwrap(), 10);
        assert_eq!(clone.get("k7").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_close_propagates_to_shards() {
        let temp_dir = TempDir::new().unwrap();
        let router = ShardRouter::open(temp_dir.path(), "docs", StorageKind::Log, 2).unwrap();
        router.close().unwrap();
        assert!(matches!(router.get("x"), Err(QuarryError::StorageClosed)));
    }
}

//! Copy-on-write snapshot storage.
//!
//! The whole key space lives in memory and is written out as a single file on
//! every mutation:
//!
//! ```text
//! +--------+-------------+-----------------------+-----------+
//! | "QSNP" | version u32 | bincode(BTreeMap)     | crc32 u32 |
//! +--------+-------------+-----------------------+-----------+
//! ```
//!
//! A mutation clones the current map, applies the change, persists the clone
//! to a temporary file and renames it over the database. The in-memory map is
//! swapped only after the rename succeeds, so readers never observe a state
//! that is not on disk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;

use crate::error::{QuarryError, Result};
use crate::storage::{KvStore, StorageKind, ensure_parent, validate_batch};

const MAGIC: &[u8; 4] = b"QSNP";
const VERSION: u32 = 1;

type Entries = BTreeMap<String, Vec<u8>>;

#[derive(Debug)]
struct SnapshotInner {
    entries: Entries,
    closed: bool,
}

/// File-backed key-value store that rewrites a full snapshot on every change.
///
/// Suited to small, rarely written databases such as index metadata.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    inner: RwLock<SnapshotInner>,
}

impl SnapshotStore {
    /// Open the snapshot at `path`, creating an empty one if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;

        let entries = if path.exists() {
            read_snapshot(&path)?
        } else {
            let entries = Entries::new();
            write_snapshot(&path, &entries)?;
            entries
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened snapshot store");

        Ok(SnapshotStore {
            path,
            inner: RwLock::new(SnapshotInner {
                entries,
                closed: false,
            }),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Entries),
    {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(QuarryError::StorageClosed);
        }
        let mut next = inner.entries.clone();
        f(&mut next);
        write_snapshot(&self.path, &next)?;
        inner.entries = next;
        Ok(())
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Entries) -> T,
    {
        let inner = self.inner.read();
        if inner.closed {
            return Err(QuarryError::StorageClosed);
        }
        Ok(f(&inner.entries))
    }
}

impl KvStore for SnapshotStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Snapshot
    }

    fn list(&self) -> Result<Vec<Vec<u8>>> {
        self.read(|entries| entries.values().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(QuarryError::EmptyKey);
        }
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_vec());
        })
    }

    fn batch(&self, keys: &[String], values: &[Vec<u8>]) -> Result<()> {
        validate_batch(keys, values)?;
        if keys.is_empty() {
            return Ok(());
        }
        self.mutate(|entries| {
            for (key, value) in keys.iter().zip(values) {
                entries.insert(key.clone(), value.clone());
            }
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(QuarryError::EmptyKey);
        }
        if !self.read(|entries| entries.contains_key(key))? {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn delete_all(&self) -> Result<()> {
        self.mutate(|entries| entries.clear())
    }

    fn clone_to(&self, path: &Path) -> Result<()> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(QuarryError::StorageClosed);
        }
        ensure_parent(path)?;
        write_snapshot(path, &inner.entries)
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.closed {
            inner.closed = true;
            tracing::debug!(path = %self.path.display(), "closed snapshot store");
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        self.read(|entries| entries.len())
    }
}

fn read_snapshot(path: &Path) -> Result<Entries> {
    let data = fs::read(path)?;
    if data.len() < MAGIC.len() + 8 || &data[..MAGIC.len()] != MAGIC {
        return Err(QuarryError::corrupted(format!(
            "{} is not a snapshot file",
            path.display()
        )));
    }

    let mut header = &data[MAGIC.len()..MAGIC.len() + 4];
    let version = header.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(QuarryError::corrupted(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let body_end = data.len() - 4;
    let body = &data[MAGIC.len() + 4..body_end];
    let mut trailer = &data[body_end..];
    let expected = trailer.read_u32::<LittleEndian>()?;
    if crc32fast::hash(body) != expected {
        return Err(QuarryError::corrupted(format!(
            "checksum mismatch in {}",
            path.display()
        )));
    }

    bincode::deserialize(body).map_err(|e| QuarryError::corrupted(e.to_string()))
}

fn write_snapshot(path: &Path, entries: &Entries) -> Result<()> {
    let body = bincode::serialize(entries)?;
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(VERSION)?;
        writer.write_all(&body)?;
        writer.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta");
        {
            let store = SnapshotStore::open(&path).unwrap();
            store.set("index-a", b"{}").unwrap();
            store
                .batch(
                    &["index-b".to_string(), "index-c".to_string()],
                    &[b"b".to_vec(), b"c".to_vec()],
                )
                .unwrap();
            store.delete("index-c").unwrap();
            store.close().unwrap();
        }

        let store = SnapshotStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.get("index-b").unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.get("index-c").unwrap(), None);
    }

    #[test]
    fn test_failed_batch_leaves_state_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(temp_dir.path().join("meta")).unwrap();
        store.set("a", b"1").unwrap();

        let result = store.batch(&["b".to_string()], &[]);
        assert!(matches!(
            result,
            Err(QuarryError::KeyValueMismatch { keys: 1, values: 0 })
        ));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_detects_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta");
        {
            let store = SnapshotStore::open(&path).unwrap();
            store.set("a", b"1").unwrap();
        }

        let mut data = fs::read(&path).unwrap();
        let middle = data.len() / 2;
        data[middle] ^= 0xff;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            SnapshotStore::open(&path),
            Err(QuarryError::Corrupted(_))
        ));
    }

    #[test]
    fn test_clone_and_delete_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(temp_dir.path().join("meta")).unwrap();
        store.set("a", b"1").unwrap();

        let copy = temp_dir.path().join("copy").join("meta");
        store.clone_to(&copy).unwrap();
        store.delete_all().unwrap();

        assert_eq!(store.count().unwrap(), 0);
        let clone = SnapshotStore::open(&copy).unwrap();
        assert_eq!(clone.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(temp_dir.path().join("meta")).unwrap();
        store.close().unwrap();
        assert!(matches!(store.list(), Err(QuarryError::StorageClosed)));
        assert!(matches!(store.delete_all(), Err(QuarryError::StorageClosed)));
    }
}

//! Storage abstraction layer for Quarry.
//!
//! This module exposes a pluggable key-value facade shared by the document
//! store, the inverted index and the metadata store. Backends can be swapped
//! without touching higher-level code.
//!
//! # Architecture
//!
//! - **KvStore trait**: Unified interface for all storage backends
//! - **StorageKind enum**: The string tag used to select a backend
//! - **StorageKind::open**: Static tag-to-constructor registry
//!
//! # Storage Types
//!
//! ## LogStore (`"log"`)
//! - Append-only record log with crc32-checked frames
//! - Torn tails are truncated on open; dead records are compacted away
//!
//! ## SnapshotStore (`"snapshot"`)
//! - Whole-database copy-on-write snapshot
//! - Every mutation atomically replaces the file
//!
//! # Example
//!
//! ```
//! use quarry::storage::{KvStore, StorageKind};
//!
//! # fn main() -> quarry::error::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let store = StorageKind::Log.open(dir.path().join("example.db"))?;
//!
//! store.set("greeting", b"hello")?;
//! assert_eq!(store.get("greeting")?, Some(b"hello".to_vec()));
//! assert_eq!(store.get("missing")?, None);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

pub mod log;
pub mod snapshot;

pub use log::LogStore;
pub use snapshot::SnapshotStore;

/// A flat, string-keyed, file-backed key-value database.
///
/// All operations are synchronous and may block on disk I/O. Absent keys are
/// reported as `Ok(None)` rather than as errors. Every call after
/// [`KvStore::close`] fails with [`QuarryError::StorageClosed`].
pub trait KvStore: Send + Sync + fmt::Debug {
    /// The tag this backend was opened with.
    fn kind(&self) -> StorageKind;

    /// All values, in key order.
    fn list(&self) -> Result<Vec<Vec<u8>>>;

    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store several pairs at once. The call is atomic: either every pair is
    /// written or none is.
    fn batch(&self, keys: &[String], values: &[Vec<u8>]) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key.
    fn delete_all(&self) -> Result<()>;

    /// Write a deep copy of the live contents to a new database at `path`.
    fn clone_to(&self, path: &Path) -> Result<()>;

    /// Flush and release the underlying file.
    fn close(&self) -> Result<()>;

    /// Number of live keys.
    fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }
}

/// Tag selecting a [`KvStore`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Append-only log ([`LogStore`]).
    #[default]
    Log,
    /// Copy-on-write snapshot ([`SnapshotStore`]).
    Snapshot,
}

impl StorageKind {
    /// Open (or create) a database of this kind at `path`.
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Arc<dyn KvStore>> {
        match self {
            StorageKind::Log => Ok(Arc::new(LogStore::open(path)?)),
            StorageKind::Snapshot => Ok(Arc::new(SnapshotStore::open(path)?)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Log => "log",
            StorageKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(StorageKind::Log),
            "snapshot" => Ok(StorageKind::Snapshot),
            other => Err(QuarryError::invalid_argument(format!(
                "unknown storage kind '{other}'"
            ))),
        }
    }
}

/// Reject batches whose keys and values do not line up, and empty keys.
pub(crate) fn validate_batch(keys: &[String], values: &[Vec<u8>]) -> Result<()> {
    if keys.len() != values.len() {
        return Err(QuarryError::KeyValueMismatch {
            keys: keys.len(),
            values: values.len(),
        });
    }
    if keys.iter().any(|key| key.is_empty()) {
        return Err(QuarryError::EmptyKey);
    }
    Ok(())
}

/// Create the parent directory of a database file if needed.
pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

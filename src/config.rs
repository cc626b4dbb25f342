//! Engine configuration.
//!
//! Every field has a default, so a configuration file only needs to name the
//! values it changes:
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/quarry",
//!   "default_number_of_shards": 4,
//!   "inverted": { "mode": "async", "cache_ttl_secs": 10 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::TokenizerKind;
use crate::error::{QuarryError, Result};
use crate::inverted::InvertedMode;
use crate::storage::StorageKind;

/// Top-level configuration of an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory; indices live under `indices/`, metadata under `metadata/`.
    pub data_dir: PathBuf,

    /// Backend of the metadata store.
    pub meta_storage: StorageKind,

    /// Backend used by new indices unless they ask for another one.
    pub default_storage: StorageKind,

    pub default_tokenizer: TokenizerKind,

    /// Shard count of new indices.
    pub default_number_of_shards: usize,

    pub inverted: InvertedConfig,

    /// Documents written per chunk by the bulk executor.
    pub bulk_batch_size: usize,

    /// Number of hits returned when a search does not say.
    pub default_search_size: usize,

    /// Search deadline in milliseconds; 0 disables the deadline.
    pub search_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("./data"),
            meta_storage: StorageKind::Snapshot,
            default_storage: StorageKind::Log,
            default_tokenizer: TokenizerKind::Standard,
            default_number_of_shards: 10,
            inverted: InvertedConfig::default(),
            bulk_batch_size: 1000,
            default_search_size: 10,
            search_timeout_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        EngineConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(QuarryError::invalid_argument("data_dir cannot be empty"));
        }
        if self.default_number_of_shards == 0 {
            return Err(QuarryError::invalid_argument(
                "default_number_of_shards must be positive",
            ));
        }
        if self.bulk_batch_size == 0 {
            return Err(QuarryError::invalid_argument(
                "bulk_batch_size must be positive",
            ));
        }
        if self.inverted.queue_capacity == 0 {
            return Err(QuarryError::invalid_argument(
                "inverted.queue_capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Default search deadline, `None` when disabled.
    pub fn search_timeout(&self) -> Option<Duration> {
        (self.search_timeout_ms > 0).then(|| Duration::from_millis(self.search_timeout_ms))
    }

    pub fn indices_dir(&self) -> PathBuf {
        self.data_dir.join("indices")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata").join("meta")
    }

    pub fn with_default_storage(mut self, kind: StorageKind) -> Self {
        self.default_storage = kind;
        self
    }

    pub fn with_default_tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.default_tokenizer = kind;
        self
    }

    pub fn with_number_of_shards(mut self, shards: usize) -> Self {
        self.default_number_of_shards = shards;
        self
    }

    pub fn with_inverted_mode(mut self, mode: InvertedMode) -> Self {
        self.inverted.mode = mode;
        self
    }

    pub fn with_bulk_batch_size(mut self, size: usize) -> Self {
        self.bulk_batch_size = size;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Settings of the inverted index engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertedConfig {
    /// Engine used by new indices.
    pub mode: InvertedMode,

    /// Capacity of each shard worker's queue (async mode).
    pub queue_capacity: usize,

    /// Lifetime of cached keyword lists (async mode).
    pub cache_ttl_secs: u64,
}

impl Default for InvertedConfig {
    fn default() -> Self {
        InvertedConfig {
            mode: InvertedMode::Sync,
            queue_capacity: 1024,
            cache_ttl_secs: 30,
        }
    }
}

impl InvertedConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

//! # Quarry
//!
//! An embedded, sharded full-text search engine for JSON documents.
//!
//! ## Features
//!
//! - Named indices, each split over a configurable number of shards
//! - Two file-backed storage engines: an append-only log and a
//!   copy-on-write snapshot
//! - A keyword to document-id inverted index, maintained either inline or by
//!   per-shard background workers with a TTL cache
//! - Unicode and Chinese (jieba) tokenization
//! - Weighted keyword search with a lookup deadline and partial results
//! - Chunked bulk loading and newline-delimited bulk requests with
//!   per-item results

pub mod analysis;
pub mod bulk;
pub mod cache;
pub mod cli;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod inverted;
pub mod search;
pub mod shard;
pub mod storage;

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::document::Document;
    pub use crate::engine::{CreateIndexOptions, Engine};
    pub use crate::error::{QuarryError, Result};
    pub use crate::search::{SearchOptions, SearchResult};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

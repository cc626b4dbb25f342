//! Command line argument parsing for the Quarry CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::analysis::TokenizerKind;
use crate::inverted::InvertedMode;
use crate::storage::StorageKind;

/// Quarry - an embedded, sharded full-text search engine for JSON documents
#[derive(Parser, Debug, Clone)]
#[command(name = "quarry")]
#[command(about = "An embedded, sharded full-text search engine for JSON documents")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct QuarryArgs {
    /// Data directory holding every index
    #[arg(short = 'd', long, env = "QUARRY_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// JSON configuration file; --data-dir overrides its data_dir
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "json")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl QuarryArgs {
    /// Default log filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a new index
    Create(CreateArgs),

    /// List all indices
    List,

    /// Show the metadata of an index
    Info(IndexArgs),

    /// Delete an index and all of its documents
    Delete(IndexArgs),

    /// Open an index
    Open(IndexArgs),

    /// Close an index
    Close(IndexArgs),

    /// Copy an index under a new name
    Clone(CloneArgs),

    /// Index (create or replace) a document
    Put(PutArgs),

    /// Merge fields into an existing document
    Update(UpdateArgs),

    /// Fetch a document by id
    Get(DocumentArgs),

    /// Delete a document by id
    Remove(DocumentArgs),

    /// Apply a newline-delimited bulk file
    Bulk(BulkArgs),

    /// Search an index
    Search(SearchArgs),
}

/// Arguments for creating an index
#[derive(Parser, Debug, Clone)]
pub struct CreateArgs {
    /// Name of the index
    pub index: String,

    /// Number of shards (defaults to the configured value)
    #[arg(short, long)]
    pub shards: Option<usize>,

    /// Storage backend: log or snapshot
    #[arg(long)]
    pub storage: Option<StorageKind>,

    /// Tokenizer: standard or jieba
    #[arg(long)]
    pub tokenizer: Option<TokenizerKind>,

    /// Inverted index engine: sync or async
    #[arg(long)]
    pub inverted: Option<InvertedMode>,

    /// Mapping file (JSON) stored with the index
    #[arg(long, value_name = "MAPPING_FILE")]
    pub mapping: Option<PathBuf>,
}

/// Arguments naming one index
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    pub index: String,
}

/// Arguments for cloning an index
#[derive(Parser, Debug, Clone)]
pub struct CloneArgs {
    pub source: String,
    pub target: String,
}

/// Arguments for indexing a document
#[derive(Parser, Debug, Clone)]
pub struct PutArgs {
    pub index: String,

    /// Document id; generated when omitted
    #[arg(long)]
    pub id: Option<String>,

    /// Document source as a JSON object; read from stdin when omitted
    pub source: Option<String>,
}

/// Arguments for a partial update
#[derive(Parser, Debug, Clone)]
pub struct UpdateArgs {
    pub index: String,
    pub id: String,

    /// Fields to merge, as a JSON object
    pub fields: String,
}

/// Arguments addressing one document
#[derive(Parser, Debug, Clone)]
pub struct DocumentArgs {
    pub index: String,
    pub id: String,
}

/// Arguments for bulk loading
#[derive(Parser, Debug, Clone)]
pub struct BulkArgs {
    /// Newline-delimited bulk file
    #[arg(value_name = "BULK_FILE")]
    pub file: PathBuf,

    /// Index used by items without an _index
    #[arg(short, long)]
    pub index: Option<String>,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    pub index: String,

    /// Query string
    pub query: String,

    /// Maximum number of hits (0 = all; defaults to the configured size)
    #[arg(short = 'n', long)]
    pub size: Option<usize>,

    /// Number of hits to skip
    #[arg(long, default_value = "0")]
    pub from: usize,

    /// Lookup deadline in milliseconds (0 = none; defaults to the configured value)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

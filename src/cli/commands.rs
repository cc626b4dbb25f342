//! Command implementations for the Quarry CLI.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cli::args::*;
use crate::cli::output::output_result;
use crate::config::EngineConfig;
use crate::document::Document;
use crate::engine::{CreateIndexOptions, Engine};
use crate::error::{QuarryError, Result};
use crate::search::SearchOptions;

/// Acknowledgement printed by commands without a richer result.
#[derive(Debug, Serialize)]
struct Acknowledged<'a> {
    acknowledged: bool,
    index: &'a str,
}

/// Result of a single-document write.
#[derive(Debug, Serialize)]
struct DocumentWriteResult<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: String,
    result: &'static str,
}

/// Result of fetching a document.
#[derive(Debug, Serialize)]
struct GetResult<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
    found: bool,
    #[serde(rename = "@timestamp", skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    source: Option<Map<String, Value>>,
}

/// Build the engine configuration from the config file and flags.
pub fn load_config(args: &QuarryArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.data_dir = args.data_dir.clone();
    config.validate()?;
    Ok(config)
}

/// Execute a CLI command.
pub fn execute_command(args: QuarryArgs) -> Result<()> {
    let engine = Engine::open(load_config(&args)?)?;
    let outcome = run(&engine, &args);
    let closed = engine.shutdown();
    outcome.and(closed)
}

fn run(engine: &Engine, args: &QuarryArgs) -> Result<()> {
    match &args.command {
        Command::Create(create) => create_index(engine, create, args),
        Command::List => output_result("Indices", &engine.list_indices()?, args),
        Command::Info(target) => {
            let info = engine.get_index(&target.index)?.info();
            output_result("Index", &info, args)
        }
        Command::Delete(target) => {
            engine.delete_index(&target.index)?;
            acknowledge("Index deleted", &target.index, args)
        }
        Command::Open(target) => {
            engine.open_index(&target.index)?;
            acknowledge("Index opened", &target.index, args)
        }
        Command::Close(target) => {
            engine.close_index(&target.index)?;
            acknowledge("Index closed", &target.index, args)
        }
        Command::Clone(clone) => {
            engine.clone_index(&clone.source, &clone.target)?;
            acknowledge("Index cloned", &clone.target, args)
        }
        Command::Put(put) => put_document(engine, put, args),
        Command::Update(update) => update_document(engine, update, args),
        Command::Get(target) => get_document(engine, target, args),
        Command::Remove(target) => remove_document(engine, target, args),
        Command::Bulk(bulk) => {
            let file = File::open(&bulk.file)?;
            let response = engine.bulk(bulk.index.as_deref(), BufReader::new(file))?;
            output_result("Bulk applied", &response, args)
        }
        Command::Search(search) => search_index(engine, search, args),
    }
}

fn acknowledge(message: &str, index: &str, args: &QuarryArgs) -> Result<()> {
    output_result(
        message,
        &Acknowledged {
            acknowledged: true,
            index,
        },
        args,
    )
}

fn create_index(engine: &Engine, create: &CreateArgs, args: &QuarryArgs) -> Result<()> {
    let mapping = match &create.mapping {
        Some(path) => Some(serde_json::from_str::<Value>(&fs::read_to_string(path)?)?),
        None => None,
    };
    engine.create_index(
        &create.index,
        CreateIndexOptions {
            number_of_shards: create.shards,
            storage: create.storage,
            tokenizer: create.tokenizer,
            inverted_mode: create.inverted,
            mapping,
        },
    )?;
    acknowledge("Index created", &create.index, args)
}

fn put_document(engine: &Engine, put: &PutArgs, args: &QuarryArgs) -> Result<()> {
    let text = match &put.source {
        Some(text) => text.clone(),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    let document = Document::from_value(put.id.clone().unwrap_or_default(), serde_json::from_str(&text)?)?;

    let index = engine.get_or_create_index(&put.index)?;
    let outcome = index.index_document(document)?;
    index.flush()?;
    output_result(
        "Document indexed",
        &DocumentWriteResult {
            index: &put.index,
            id: outcome.id,
            result: if outcome.created { "created" } else { "updated" },
        },
        args,
    )
}

fn update_document(engine: &Engine, update: &UpdateArgs, args: &QuarryArgs) -> Result<()> {
    let fields: Map<String, Value> = match serde_json::from_str(&update.fields)? {
        Value::Object(fields) => fields,
        _ => {
            return Err(QuarryError::invalid_argument(
                "update fields must be a JSON object",
            ));
        }
    };

    let index = engine.get_index(&update.index)?;
    let outcome = index.update_document(&update.id, fields)?;
    index.flush()?;
    output_result(
        "Document updated",
        &DocumentWriteResult {
            index: &update.index,
            id: outcome.id,
            result: "updated",
        },
        args,
    )
}

fn get_document(engine: &Engine, target: &DocumentArgs, args: &QuarryArgs) -> Result<()> {
    let document = engine.get_index(&target.index)?.retrieve_document(&target.id)?;
    output_result(
        "Document",
        &GetResult {
            index: &target.index,
            id: &target.id,
            found: document.is_some(),
            timestamp: document.as_ref().map(|doc| doc.timestamp),
            source: document.map(|doc| doc.source),
        },
        args,
    )
}

fn remove_document(engine: &Engine, target: &DocumentArgs, args: &QuarryArgs) -> Result<()> {
    let index = engine.get_index(&target.index)?;
    let deleted = index.delete_document(&target.id)?;
    index.flush()?;
    output_result(
        "Document removed",
        &DocumentWriteResult {
            index: &target.index,
            id: target.id.clone(),
            result: if deleted { "deleted" } else { "not_found" },
        },
        args,
    )
}

fn search_index(engine: &Engine, search: &SearchArgs, args: &QuarryArgs) -> Result<()> {
    let config = engine.config();
    let timeout = match search.timeout_ms {
        Some(ms) => Duration::from_millis(ms),
        None => config.search_timeout().unwrap_or(Duration::ZERO),
    };
    let options = SearchOptions::new(search.query.as_str())
        .with_top_n(search.size.unwrap_or(config.default_search_size))
        .with_from(search.from)
        .with_timeout(timeout);

    let result = engine.get_index(&search.index)?.search(&options)?;
    output_result("Search results", &result, args)
}

//! Weighted keyword search with a deadline.
//!
//! A query is split into *primary* keywords (weighted by the tokenizer) and
//! *secondary* tokens (everything else the tokenizer emits, stop words
//! included). Search runs in two phases:
//!
//! 1. **Lookup.** One thread per primary keyword streams `(doc_id, weight)`
//!    pairs from the inverted index into a bounded channel. The caller sums
//!    the weights per document until every lookup finished or the deadline
//!    passed. On timeout the partial scores are kept and the lookups are
//!    told to stop. A failed lookup aborts the search: the result carries
//!    the error and no hits.
//! 2. **Boost.** Every candidate is fetched. For each secondary token found
//!    among the document's keywords its score grows by
//!    `score / |primary| * spread`, where
//!    `spread = |secondary| / (|primary| + |secondary|)`.
//!
//! Failures are reported in [`SearchResult::error`], never as an `Err`. A
//! document that cannot be fetched during the boost phase is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::WordWeight;
use crate::analysis::tokenizer::is_meaningful;
use crate::document::Document;
use crate::error::{QuarryError, Result};
use crate::index::{Index, IndexHandles};

/// Parameters of one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    /// Maximum number of hits returned; 0 returns all of them.
    pub top_n: usize,
    /// Number of ranked hits to skip.
    pub from: usize,
    /// Deadline of the lookup phase; zero means no deadline.
    pub timeout: Duration,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        SearchOptions {
            query: query.into(),
            top_n: 10,
            from: 0,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A ranked document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: &'static str,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: f64,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "_source")]
    pub source: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Hits {
    /// Number of matching documents before pagination.
    pub total: usize,
    pub max_score: f64,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    /// Wall time in milliseconds.
    pub took: u64,
    /// Whether the deadline cut the lookup phase short.
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hits: Hits,
}

#[derive(Debug)]
enum Lookup {
    Hit(String, f64),
    Done(Result<()>),
}

/// Scores gathered by the lookup phase.
#[derive(Debug, Default)]
struct Gathered {
    scores: AHashMap<String, f64>,
    timed_out: bool,
    error: Option<String>,
}

impl Index {
    /// Run a ranked keyword search. Only failing to open the index is an
    /// error; everything else is reported inside the result.
    pub fn search(&self, options: &SearchOptions) -> Result<SearchResult> {
        let start = Instant::now();
        let handles = self.handles()?;

        let primary = handles
            .tokenizer
            .keywords_weight(&options.query, options.query.chars().count());
        if primary.is_empty() {
            return Ok(SearchResult {
                took: start.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }
        let secondary = secondary_tokens(&handles, &options.query, &primary);
        let spread = secondary.len() as f64 / (primary.len() + secondary.len()) as f64;

        let deadline = (!options.timeout.is_zero()).then(|| start + options.timeout);
        let gathered = gather(&handles, &primary, deadline);
        if let Some(error) = gathered.error {
            tracing::warn!(index = self.name(), query = %options.query, %error, "search lookup failed");
            return Ok(SearchResult {
                took: start.elapsed().as_millis() as u64,
                timed_out: gathered.timed_out,
                error: Some(error),
                ..Default::default()
            });
        }
        if gathered.timed_out {
            tracing::warn!(
                index = self.name(),
                query = %options.query,
                candidates = gathered.scores.len(),
                "search lookup timed out, returning partial results"
            );
        }

        let mut error = None;
        let boost = |score: f64| score / primary.len() as f64 * spread;
        let candidates: Vec<(String, f64)> = gathered.scores.into_iter().collect();
        let fetched: Vec<(String, f64, Result<Option<Document>>)> = candidates
            .into_par_iter()
            .map(|(id, score)| {
                let doc = handles.load_document(&id);
                (id, score, doc)
            })
            .collect();

        let mut hits = Vec::with_capacity(fetched.len());
        for (id, mut score, doc) in fetched {
            let doc = match doc {
                Ok(Some(doc)) => doc,
                Ok(None) => continue,
                Err(e) => {
                    error.get_or_insert_with(|| e.to_string());
                    continue;
                }
            };
            let keywords: AHashSet<&str> = doc.keywords.iter().map(String::as_str).collect();
            for token in &secondary {
                if keywords.contains(token.as_str()) {
                    score += boost(score);
                }
            }
            hits.push(Hit {
                index: self.name().to_string(),
                doc_type: "_doc",
                id,
                score,
                timestamp: doc.timestamp,
                source: doc.source,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        let total = hits.len();
        let max_score = hits.first().map_or(0.0, |hit| hit.score);
        let take = if options.top_n == 0 { usize::MAX } else { options.top_n };
        let hits = hits.into_iter().skip(options.from).take(take).collect();

        Ok(SearchResult {
            took: start.elapsed().as_millis() as u64,
            timed_out: gathered.timed_out,
            error,
            hits: Hits {
                total,
                max_score,
                hits,
            },
        })
    }
}

/// Tokens of `query` that are not primary keywords, deduplicated.
fn secondary_tokens(handles: &IndexHandles, query: &str, primary: &[WordWeight]) -> Vec<String> {
    let primary: AHashSet<&str> = primary.iter().map(|w| w.word.as_str()).collect();
    let mut seen = AHashSet::new();
    handles
        .tokenizer
        .tokenize(query)
        .into_iter()
        .filter(|token| is_meaningful(token) && !primary.contains(token.as_str()))
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Lookup phase: fan out one thread per keyword and sum weights per document.
///
/// Dedicated threads keep lookups runnable when the caller itself is a rayon
/// worker blocked in [`aggregate`].
fn gather(handles: &Arc<IndexHandles>, primary: &[WordWeight], deadline: Option<Instant>) -> Gathered {
    let (tx, rx) = bounded(primary.len() * 10);
    let cancel = Arc::new(AtomicBool::new(false));

    let mut spawned = 0;
    for keyword in primary {
        let tx = tx.clone();
        let thread_cancel = Arc::clone(&cancel);
        let handles = Arc::clone(handles);
        let WordWeight { word, weight } = keyword.clone();
        let outcome = thread::Builder::new()
            .name("quarry-search-lookup".to_string())
            .spawn(move || {
                let outcome = lookup(&handles, &word, weight, &tx, &thread_cancel);
                let _ = tx.send(Lookup::Done(outcome));
            });
        if let Err(e) = outcome {
            cancel.store(true, Ordering::Relaxed);
            return Gathered {
                error: Some(QuarryError::from(e).to_string()),
                ..Default::default()
            };
        }
        spawned += 1;
    }
    drop(tx);

    let gathered = aggregate(&rx, spawned, deadline, &cancel);
    // Dropping the receiver unblocks lookups waiting on a full channel.
    cancel.store(true, Ordering::Relaxed);
    drop(rx);
    gathered
}

/// Stream the ids of one keyword, stopping early once cancelled.
fn lookup(
    handles: &IndexHandles,
    word: &str,
    weight: f64,
    tx: &Sender<Lookup>,
    cancel: &AtomicBool,
) -> Result<()> {
    for id in handles.inverted.get_ids(word)? {
        if cancel.load(Ordering::Relaxed) || tx.send(Lookup::Hit(id, weight)).is_err() {
            break;
        }
    }
    Ok(())
}

fn aggregate(
    rx: &Receiver<Lookup>,
    mut pending: usize,
    deadline: Option<Instant>,
    cancel: &AtomicBool,
) -> Gathered {
    let mut gathered = Gathered::default();
    let timer = match deadline {
        Some(deadline) => crossbeam_channel::at(deadline),
        None => crossbeam_channel::never(),
    };

    while pending > 0 {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            gathered.timed_out = true;
            break;
        }
        select! {
            recv(rx) -> message => match message {
                Ok(Lookup::Hit(id, weight)) => {
                    *gathered.scores.entry(id).or_insert(0.0) += weight;
                }
                Ok(Lookup::Done(Ok(()))) => pending -= 1,
                Ok(Lookup::Done(Err(e))) => {
                    cancel.store(true, Ordering::Relaxed);
                    gathered.error = Some(e.to_string());
                    break;
                }
                Err(_) => {
                    gathered.error.get_or_insert_with(|| {
                        QuarryError::worker("search lookup ended without reporting").to_string()
                    });
                    break;
                }
            },
            recv(timer) -> _ => {
                gathered.timed_out = true;
                break;
            }
        }
    }
    gathered
}

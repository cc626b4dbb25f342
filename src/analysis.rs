//! Text analysis for Quarry.
//!
//! Documents and queries go through a [`Tokenizer`](tokenizer::Tokenizer),
//! which splits text into lowercase tokens and ranks the meaningful ones by
//! weight. The tokenizer of an index is chosen by tag ([`TokenizerKind`]) when
//! the index is created and rebuilt from that tag whenever it is opened.

pub mod stop;
pub mod tokenizer;

pub use tokenizer::{Tokenizer, TokenizerKind, WordWeight};

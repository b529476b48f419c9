//! engram-search - Hybrid retrieval over enriched chat records.
//!
//! A query is answered from three signals: vector similarity against the
//! record embeddings, overlap with the concepts the query mentions, and a
//! verbatim keyword bonus. The [`Searcher`] merges them with a fixed
//! scoring function and returns the top hits.

mod monitor;
mod searcher;
mod text;

pub use monitor::{NoopMonitor, SearchMonitor};
pub use searcher::Searcher;
pub use text::{contains_all_query_words, tokenize_and_filter};

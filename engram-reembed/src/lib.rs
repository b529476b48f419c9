//! engram-reembed - Offline maintenance passes over a database.
//!
//! Three operations share one decomposition (config, iterator, batch
//! processor, orchestrator): re-embedding every chat record, re-embedding
//! every concept, and re-running concept extraction. All three retry
//! provider calls with exponential backoff and unit-normalize vectors
//! before writing, so databases built against a non-normalizing provider
//! stay usable with inner-product similarity.

mod batch;
mod extract;
mod iterator;
mod progress;
mod reembedder;
mod retry;
mod vector;

pub use batch::{BatchProcessor, ConceptBatchProcessor};
pub use extract::ConceptExtractionRunner;
pub use iterator::{ConceptIterator, RecordIterator};
pub use progress::ProgressTracker;
pub use reembedder::{ConceptReembedder, Reembedder, ReembedConfig};
pub use retry::retry_with_backoff;
pub use vector::normalize_vector;

//! engram-ingest - Asynchronous enrichment of chat records.
//!
//! The [`Pipeline`] stores messages synchronously, then hands their ids to
//! two worker pools: one generating embeddings, one extracting concepts.
//! Each processor persists a checkpoint after successful batches; a
//! synchronous recovery pass at construction time re-runs anything a crash
//! left behind, so callers never observe stale unenriched records from
//! before startup.

mod concept;
mod embedding;
mod pipeline;
mod pool;
mod processor;

pub use concept::{ConceptProcessor, PROCESSOR_TYPE_CONCEPT};
pub use embedding::{EmbeddingProcessor, PROCESSOR_TYPE_EMBEDDING};
pub use pipeline::{IngestOptions, Pipeline, PipelineBuilder, PipelineConfig};
pub use pool::WorkerPool;
pub use processor::Processor;

//! engram - An embedded semantic-memory engine for conversational records.
//!
//! Chat messages are stored immediately, enriched asynchronously with
//! vector embeddings and extracted concepts, and retrieved through a hybrid
//! search combining vector similarity, conceptual overlap, and verbatim
//! keyword matching.
//!
//! ```no_run
//! use engram::{Database, DatabaseOptions, IngestOptions, PipelineConfig, Speaker};
//!
//! # async fn example() -> engram::Result<()> {
//! let db = Database::open("./memory", DatabaseOptions::default())?;
//! let pipeline = db.pipeline(PipelineConfig::default()).await?;
//!
//! pipeline
//!     .ingest(
//!         Speaker::Human,
//!         &["Alice went to Paris".to_string()],
//!         IngestOptions::default(),
//!     )
//!     .await?;
//!
//! let results = db.searcher().search("where did alice go?", 5).await?;
//! for hit in results {
//!     println!("{:.2}  {}", hit.score, hit.record.contents);
//! }
//!
//! pipeline.release().await;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

mod database;

pub use database::{Database, DatabaseOptions};

pub use engram_ai::{AiConfig, ConceptExtractor, Embedder, ExtractedConcept, Provider};
pub use engram_core::{
    ChatRecord, Checkpoint, Concept, ConceptRef, Error, ErrorKind, Id, Result, SearchResult,
    Speaker,
};
pub use engram_ingest::{IngestOptions, Pipeline, PipelineConfig};
pub use engram_search::{NoopMonitor, SearchMonitor, Searcher};
pub use engram_store::{Backend, ChatStore, CheckpointStore, ConceptStore};

//! engram-ai - AI capabilities consumed by the engine.
//!
//! The core pipeline and searcher depend only on the [`Embedder`] and
//! [`ConceptExtractor`] traits defined here. Production code talks to an
//! OpenAI-compatible service via [`openai::OpenAiProvider`]; tests use the
//! in-process doubles in [`mock`].

pub mod config;
pub mod mock;
pub mod openai;

pub use config::AiConfig;

use std::sync::Arc;

use async_trait::async_trait;
use engram_core::Result;
use serde::{Deserialize, Serialize};

/// Generates vector embeddings from text for semantic similarity search.
///
/// Vectors are expected to be unit-normalized by the provider; the engine
/// computes similarity as a plain inner product.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. The result contains one vector per input, in
    /// input order. Partial success is not representable: any failure fails
    /// the whole batch.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Extracts semantic concepts from text.
#[async_trait]
pub trait ConceptExtractor: Send + Sync {
    /// Analyze `text` and return the key concepts with types and importance
    /// scores. Returns an empty vector when nothing is found.
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedConcept>>;
}

/// A concept identified in text by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedConcept {
    /// Lowercase, 1-3 words, singular form. Example: "eiffel tower".
    pub name: String,
    /// One of [`CONCEPT_TYPES`], normalized with underscores for spaces.
    #[serde(rename = "type")]
    pub concept_type: String,
    /// 1 (least relevant) to 10 (most central).
    pub importance: u8,
}

/// Aggregates an embedder and an extractor sharing one configuration.
pub trait Provider: Send + Sync {
    fn embedder(&self) -> Arc<dyn Embedder>;
    fn extractor(&self) -> Arc<dyn ConceptExtractor>;
}

/// The closed domain of concept categories extractors classify into.
pub const CONCEPT_TYPES: &[&str] = &[
    "abstract_concept",
    "activity",
    "animal",
    "art",
    "building",
    "color",
    "drink",
    "emotion",
    "event",
    "food",
    "insect",
    "man_made_object",
    "meal",
    "measurement",
    "natural_object",
    "occupation",
    "organization",
    "person",
    "place",
    "plant",
    "software",
    "technology",
    "time",
    "tool",
    "vehicle",
];

//! In-process test doubles for the AI capabilities.
//!
//! Defaults are deterministic so tests can rely on stable vectors and
//! concepts; behavior can be overridden per-call with injected closures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use engram_core::Result;

use crate::{ConceptExtractor, Embedder, ExtractedConcept, Provider};

/// Dimension of the default deterministic vectors.
const MOCK_VECTOR_DIM: usize = 384;

type EmbedTextFn = dyn Fn(&str) -> Result<Vec<f32>> + Send + Sync;
type EmbedTextsFn = dyn Fn(&[String]) -> Result<Vec<Vec<f32>>> + Send + Sync;
type ExtractFn = dyn Fn(&str) -> Result<Vec<ExtractedConcept>> + Send + Sync;

/// Test double for [`Embedder`].
///
/// Without an injected closure it returns a unit-normalized vector seeded
/// from an FNV hash of the text, so equal texts always embed equally.
#[derive(Default)]
pub struct MockEmbedder {
    embed_text_fn: Option<Box<EmbedTextFn>>,
    embed_texts_fn: Option<Box<EmbedTextsFn>>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override single-text embedding.
    pub fn with_embed_text(
        mut self,
        f: impl Fn(&str) -> Result<Vec<f32>> + Send + Sync + 'static,
    ) -> Self {
        self.embed_text_fn = Some(Box::new(f));
        self
    }

    /// Override batch embedding.
    pub fn with_embed_texts(
        mut self,
        f: impl Fn(&[String]) -> Result<Vec<Vec<f32>>> + Send + Sync + 'static,
    ) -> Self {
        self.embed_texts_fn = Some(Box::new(f));
        self
    }

    /// Number of embed calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = &self.embed_text_fn {
            return f(text);
        }
        Ok(deterministic_vector(text, MOCK_VECTOR_DIM))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = &self.embed_texts_fn {
            return f(texts);
        }
        Ok(texts
            .iter()
            .map(|t| deterministic_vector(t, MOCK_VECTOR_DIM))
            .collect())
    }
}

/// Test double for [`ConceptExtractor`].
///
/// Default behavior lifts up to five cleaned lowercase words out of the text
/// as concepts with descending importance.
#[derive(Default)]
pub struct MockExtractor {
    extract_fn: Option<Box<ExtractFn>>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override extraction.
    pub fn with_extract(
        mut self,
        f: impl Fn(&str) -> Result<Vec<ExtractedConcept>> + Send + Sync + 'static,
    ) -> Self {
        self.extract_fn = Some(Box::new(f));
        self
    }

    /// Number of extract calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConceptExtractor for MockExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedConcept>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = &self.extract_fn {
            return f(text);
        }

        let mut concepts = Vec::new();
        let mut importance = 10u8;
        for word in text.to_lowercase().split_whitespace().take(5) {
            let cleaned: String = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string();
            if cleaned.is_empty() {
                continue;
            }
            let concept_type = if cleaned.len() > 5 {
                "man_made_object"
            } else {
                "abstract_concept"
            };
            concepts.push(ExtractedConcept {
                name: cleaned,
                concept_type: concept_type.to_string(),
                importance,
            });
            if importance > 1 {
                importance -= 1;
            }
        }
        Ok(concepts)
    }
}

/// Provider bundling a [`MockEmbedder`] and a [`MockExtractor`].
pub struct MockProvider {
    embedder: Arc<MockEmbedder>,
    extractor: Arc<MockExtractor>,
}

impl MockProvider {
    pub fn new() -> Self {
        MockProvider {
            embedder: Arc::new(MockEmbedder::new()),
            extractor: Arc::new(MockExtractor::new()),
        }
    }

    /// Build a provider around preconfigured doubles.
    pub fn with_parts(embedder: MockEmbedder, extractor: MockExtractor) -> Self {
        MockProvider {
            embedder: Arc::new(embedder),
            extractor: Arc::new(extractor),
        }
    }

    /// The concrete embedder, for call-count assertions.
    pub fn mock_embedder(&self) -> Arc<MockEmbedder> {
        Arc::clone(&self.embedder)
    }

    /// The concrete extractor, for call-count assertions.
    pub fn mock_extractor(&self) -> Arc<MockExtractor> {
        Arc::clone(&self.extractor)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for MockProvider {
    fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder) as Arc<dyn Embedder>
    }

    fn extractor(&self) -> Arc<dyn ConceptExtractor> {
        Arc::clone(&self.extractor) as Arc<dyn ConceptExtractor>
    }
}

/// Build a unit-normalized vector seeded from an FNV-1a hash of the text.
pub fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut seed: u32 = 0x811c9dc5;
    for byte in text.as_bytes() {
        seed ^= u32::from(*byte);
        seed = seed.wrapping_mul(0x01000193);
    }

    let mut vector = Vec::with_capacity(dim);
    for _ in 0..dim {
        // LCG walk from the seed keeps the vector reproducible.
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        vector.push((seed % 1000) as f32 / 1000.0);
    }

    let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in &mut vector {
            *v /= magnitude;
        }
    }
    vector
}

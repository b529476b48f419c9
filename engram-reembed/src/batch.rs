//! Batch processors: embed with retry, normalize, write back.

use std::sync::Arc;
use std::time::Duration;

use engram_ai::Embedder;
use engram_core::{ChatRecord, Concept, Error, Result};
use engram_store::{ChatStore, ConceptStore};

use crate::retry::retry_with_backoff;
use crate::vector::normalize_vector;

/// Re-embeds batches of chat records.
pub struct BatchProcessor {
    chat: Arc<ChatStore>,
    embedder: Arc<dyn Embedder>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl BatchProcessor {
    pub fn new(
        chat: Arc<ChatStore>,
        embedder: Arc<dyn Embedder>,
        max_retries: u32,
        retry_base_delay: Duration,
    ) -> Self {
        BatchProcessor {
            chat,
            embedder,
            max_retries,
            retry_base_delay,
        }
    }

    /// Embed the batch contents (with retry), unit-normalize the vectors,
    /// and update the records.
    pub async fn process(&self, mut records: Vec<ChatRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = records.iter().map(|r| r.contents.clone()).collect();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = retry_with_backoff(
            || {
                let embedder = Arc::clone(&embedder);
                let texts = texts.clone();
                async move { embedder.embed_texts(&texts).await }
            },
            self.max_retries,
            self.retry_base_delay,
        )
        .await
        .map_err(|err| {
            Error::external(format!(
                "failed to generate embeddings after {} attempts: {err}",
                self.max_retries
            ))
        })?;

        if embeddings.len() != records.len() {
            return Err(Error::ResultMismatch {
                expected: records.len(),
                received: embeddings.len(),
            });
        }

        for (record, embedding) in records.iter_mut().zip(&embeddings) {
            record.vector = normalize_vector(embedding);
        }
        self.chat.update(records)?;
        Ok(())
    }
}

/// Re-embeds batches of concepts from their tuples.
pub struct ConceptBatchProcessor {
    concepts: Arc<ConceptStore>,
    embedder: Arc<dyn Embedder>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ConceptBatchProcessor {
    pub fn new(
        concepts: Arc<ConceptStore>,
        embedder: Arc<dyn Embedder>,
        max_retries: u32,
        retry_base_delay: Duration,
    ) -> Self {
        ConceptBatchProcessor {
            concepts,
            embedder,
            max_retries,
            retry_base_delay,
        }
    }

    pub async fn process(&self, mut concepts: Vec<Concept>) -> Result<()> {
        if concepts.is_empty() {
            return Ok(());
        }

        let tuples: Vec<String> = concepts.iter().map(Concept::tuple).collect();
        let embedder = Arc::clone(&self.embedder);
        let embeddings = retry_with_backoff(
            || {
                let embedder = Arc::clone(&embedder);
                let tuples = tuples.clone();
                async move { embedder.embed_texts(&tuples).await }
            },
            self.max_retries,
            self.retry_base_delay,
        )
        .await
        .map_err(|err| {
            Error::external(format!(
                "failed to generate concept embeddings after {} attempts: {err}",
                self.max_retries
            ))
        })?;

        if embeddings.len() != concepts.len() {
            return Err(Error::ResultMismatch {
                expected: concepts.len(),
                received: embeddings.len(),
            });
        }

        for (concept, embedding) in concepts.iter_mut().zip(&embeddings) {
            concept.vector = normalize_vector(embedding);
        }
        self.concepts.update(concepts)?;
        Ok(())
    }
}

//! Embedding enrichment stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use engram_ai::Embedder;
use engram_core::{Checkpoint, Error, Id, Result};
use engram_store::{ChatStore, CheckpointStore};

use crate::processor::Processor;

/// Checkpoint key of the embedding processor.
pub const PROCESSOR_TYPE_EMBEDDING: &str = "embedding";

/// Generates embeddings for chat records in batches.
///
/// The whole batch goes to the embedder in one call; any embedder error or
/// a response of the wrong length fails the batch with no partial writes.
/// Recovery re-attempts failed batches.
pub struct EmbeddingProcessor {
    chat: Arc<ChatStore>,
    checkpoints: Arc<CheckpointStore>,
    embedder: Arc<dyn Embedder>,
    last_id: AtomicU64,
}

impl EmbeddingProcessor {
    pub fn new(
        chat: Arc<ChatStore>,
        checkpoints: Arc<CheckpointStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        EmbeddingProcessor {
            chat,
            checkpoints,
            embedder,
            last_id: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Processor for EmbeddingProcessor {
    async fn process(&self, ids: &[Id]) -> Result<()> {
        tracing::info!(
            processor = "embeddings",
            records = ids.len(),
            "processing records for embeddings"
        );

        let mut ids = ids.to_vec();
        ids.sort_unstable();

        let records = self.chat.get_many(&ids)?;
        if records.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = records.iter().map(|r| r.contents.clone()).collect();
        let embeddings = self.embedder.embed_texts(&texts).await?;
        if embeddings.len() != records.len() {
            return Err(Error::ResultMismatch {
                expected: records.len(),
                received: embeddings.len(),
            });
        }

        let vectors: Vec<(Id, Vec<f32>)> = records
            .iter()
            .map(|r| r.id)
            .zip(embeddings)
            .collect();
        let updated = self.chat.apply_vectors(vectors)?;

        if let Some(last) = updated.last() {
            self.last_id.fetch_max(last.id.0, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Result<()> {
        let last_id = self.last_id.load(Ordering::SeqCst);
        if last_id == 0 {
            return Ok(());
        }
        self.checkpoints.save(Checkpoint {
            processor_type: PROCESSOR_TYPE_EMBEDDING.to_string(),
            last_id: Id(last_id),
            updated_at: Utc::now(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engram_ai::mock::MockEmbedder;
    use engram_core::{ChatRecord, ErrorKind, Speaker};
    use engram_store::testing::memory_stores;
    use engram_store::{ChatStore, CheckpointStore};

    fn fixture(embedder: MockEmbedder) -> (Arc<ChatStore>, Arc<CheckpointStore>, EmbeddingProcessor)
    {
        let (_backend, chat, _concepts, checkpoints) = memory_stores();
        let chat = Arc::new(chat);
        let checkpoints = Arc::new(checkpoints);
        let processor = EmbeddingProcessor::new(
            Arc::clone(&chat),
            Arc::clone(&checkpoints),
            Arc::new(embedder),
        );
        (chat, checkpoints, processor)
    }

    fn seed(chat: &ChatStore, count: usize) -> Vec<Id> {
        let now = Utc::now();
        let records = (0..count)
            .map(|i| ChatRecord::new(Speaker::Human, format!("message {i}"), now))
            .collect();
        chat.add(records).unwrap().iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_process_writes_vectors() {
        let (chat, _checkpoints, processor) = fixture(MockEmbedder::new());
        let ids = seed(&chat, 3);

        processor.process(&ids).await.unwrap();

        for id in &ids {
            let record = chat.get(*id).unwrap();
            assert!(!record.vector.is_empty());
        }
    }

    #[tokio::test]
    async fn test_process_sorts_ids_for_high_water_mark() {
        let (chat, checkpoints, processor) = fixture(MockEmbedder::new());
        let ids = seed(&chat, 3);

        // Submit in reverse order; the checkpoint must still be the max id.
        let mut reversed = ids.clone();
        reversed.reverse();
        processor.process(&reversed).await.unwrap();
        processor.checkpoint().await.unwrap();

        let checkpoint = checkpoints
            .load(PROCESSOR_TYPE_EMBEDDING)
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.last_id, *ids.iter().max().unwrap());
    }

    #[tokio::test]
    async fn test_result_mismatch_fails_batch() {
        let embedder = MockEmbedder::new().with_embed_texts(|_| Ok(vec![vec![0.1]]));
        let (chat, _checkpoints, processor) = fixture(embedder);
        let ids = seed(&chat, 3);

        let err = processor.process(&ids).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResultMismatch);
        // No partial writes.
        for id in &ids {
            assert!(chat.get(*id).unwrap().vector.is_empty());
        }
    }

    #[tokio::test]
    async fn test_embedder_failure_leaves_records_untouched() {
        let embedder =
            MockEmbedder::new().with_embed_texts(|_| Err(Error::external("embedder down")));
        let (chat, checkpoints, processor) = fixture(embedder);
        let ids = seed(&chat, 2);

        let err = processor.process(&ids).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);

        processor.checkpoint().await.unwrap();
        assert!(checkpoints.load(PROCESSOR_TYPE_EMBEDDING).unwrap().is_none());
        assert!(chat.get(ids[0]).unwrap().vector.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_never_lowers() {
        let (chat, checkpoints, processor) = fixture(MockEmbedder::new());
        let ids = seed(&chat, 4);

        processor.process(&ids[2..]).await.unwrap();
        processor.checkpoint().await.unwrap();
        let high = checkpoints
            .load(PROCESSOR_TYPE_EMBEDDING)
            .unwrap()
            .unwrap()
            .last_id;

        // Re-processing an earlier batch must not lower the mark.
        processor.process(&ids[..2]).await.unwrap();
        processor.checkpoint().await.unwrap();
        let after = checkpoints
            .load(PROCESSOR_TYPE_EMBEDDING)
            .unwrap()
            .unwrap()
            .last_id;
        assert_eq!(after, high);
    }

    #[tokio::test]
    async fn test_checkpoint_noop_before_first_batch() {
        let (_chat, checkpoints, processor) = fixture(MockEmbedder::new());
        processor.checkpoint().await.unwrap();
        assert!(checkpoints.load(PROCESSOR_TYPE_EMBEDDING).unwrap().is_none());
    }
}

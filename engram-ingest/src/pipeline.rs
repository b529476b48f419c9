//! Ingestion pipeline: synchronous store, asynchronous enrichment,
//! checkpointed startup recovery.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use engram_ai::Provider;
use engram_core::{ChatRecord, Error, Id, Result, Speaker};
use engram_store::{ChatStore, CheckpointStore, ConceptStore};

use crate::concept::{ConceptProcessor, PROCESSOR_TYPE_CONCEPT};
use crate::embedding::{EmbeddingProcessor, PROCESSOR_TYPE_EMBEDDING};
use crate::pool::WorkerPool;
use crate::processor::Processor;

/// Upper bound on configurable context turns.
const MAX_CONTEXT_TURNS: usize = 16;

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workers per pool. Defaults to half the available cores, minimum one.
    pub pool_size: usize,
    /// Conversation turns of context given to the extractor (each turn is
    /// two messages). Defaults to 2.
    pub context_turns: usize,
    /// Records per batch during recovery, with a checkpoint after each
    /// batch. Defaults to 10.
    pub progress_interval: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        PipelineConfig {
            pool_size: (cores / 2).max(1),
            context_turns: 2,
            progress_interval: 10,
        }
    }
}

impl PipelineConfig {
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns.min(MAX_CONTEXT_TURNS);
        self
    }

    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval.max(1);
        self
    }
}

/// Optional per-batch ingestion parameters.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Metadata attached to every record in the batch.
    pub metadata: BTreeMap<String, String>,
    /// Message timestamp; the current time when unset.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Builder for [`Pipeline`]. Every collaborator is required; missing ones
/// fail `build` with a ConfigMissing error.
#[derive(Default)]
pub struct PipelineBuilder {
    chat: Option<Arc<ChatStore>>,
    concepts: Option<Arc<ConceptStore>>,
    checkpoints: Option<Arc<CheckpointStore>>,
    provider: Option<Arc<dyn Provider>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn chat_store(mut self, chat: Arc<ChatStore>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn concept_store(mut self, concepts: Arc<ConceptStore>) -> Self {
        self.concepts = Some(concepts);
        self
    }

    pub fn checkpoint_store(mut self, checkpoints: Arc<CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate collaborators, build both processors and pools, then run
    /// the recovery pass. The pipeline is only returned once recovery has
    /// brought the database to a consistent state.
    pub async fn build(self) -> Result<Pipeline> {
        let chat = self.chat.ok_or(Error::ConfigMissing("chat store"))?;
        let concepts = self.concepts.ok_or(Error::ConfigMissing("concept store"))?;
        let checkpoints = self
            .checkpoints
            .ok_or(Error::ConfigMissing("checkpoint store"))?;
        let provider = self.provider.ok_or(Error::ConfigMissing("ai provider"))?;

        let embedding_proc = Arc::new(EmbeddingProcessor::new(
            Arc::clone(&chat),
            Arc::clone(&checkpoints),
            provider.embedder(),
        ));
        let concept_proc = Arc::new(ConceptProcessor::new(
            Arc::clone(&chat),
            Arc::clone(&concepts),
            Arc::clone(&checkpoints),
            provider.embedder(),
            provider.extractor(),
            self.config.context_turns,
        ));

        let pipeline = Pipeline {
            chat,
            checkpoints,
            embedding_pool: WorkerPool::new(self.config.pool_size),
            concept_pool: WorkerPool::new(self.config.pool_size),
            embedding_proc,
            concept_proc,
            progress_interval: self.config.progress_interval,
        };

        if let Err(err) = pipeline.recover().await {
            pipeline.release().await;
            return Err(err);
        }
        Ok(pipeline)
    }
}

/// Orchestrates ingestion and enrichment of chat records.
pub struct Pipeline {
    chat: Arc<ChatStore>,
    checkpoints: Arc<CheckpointStore>,
    embedding_pool: WorkerPool,
    concept_pool: WorkerPool,
    embedding_proc: Arc<EmbeddingProcessor>,
    concept_proc: Arc<ConceptProcessor>,
    progress_interval: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Re-process everything past the checkpoints, synchronously.
    ///
    /// Records after the lower of the two checkpoints are fetched once;
    /// each processor then handles its own tail in progress-interval
    /// batches, checkpointing after each. A processing error aborts
    /// startup; a checkpoint error after a successful batch is only logged,
    /// because the next recovery pass covers it.
    async fn recover(&self) -> Result<()> {
        let embedding_checkpoint = self.checkpoints.load(PROCESSOR_TYPE_EMBEDDING)?;
        let concept_checkpoint = self.checkpoints.load(PROCESSOR_TYPE_CONCEPT)?;

        let lowest = match (&embedding_checkpoint, &concept_checkpoint) {
            (Some(embedding), Some(concept)) => embedding.last_id.min(concept.last_id),
            // At least one processor has never run; start from the
            // beginning so it sees every record.
            _ => Id::ZERO,
        };

        let pending = self.chat.after_id(lowest)?;
        if pending.is_empty() {
            tracing::info!("no pending records to recover");
            return Ok(());
        }
        tracing::info!(count = pending.len(), "recovering pending records");

        let all_ids: Vec<Id> = pending.iter().map(|r| r.id).collect();

        let embedding_last = embedding_checkpoint.map(|c| c.last_id).unwrap_or(Id::ZERO);
        let embedding_ids: Vec<Id> = all_ids
            .iter()
            .copied()
            .filter(|id| *id > embedding_last)
            .collect();
        if !embedding_ids.is_empty() {
            tracing::info!(count = embedding_ids.len(), "recovering embeddings");
            self.process_with_progress(&*self.embedding_proc, "embeddings", &embedding_ids)
                .await?;
        }

        let concept_last = concept_checkpoint.map(|c| c.last_id).unwrap_or(Id::ZERO);
        let concept_ids: Vec<Id> = all_ids
            .iter()
            .copied()
            .filter(|id| *id > concept_last)
            .collect();
        if !concept_ids.is_empty() {
            tracing::info!(count = concept_ids.len(), "recovering concepts");
            self.process_with_progress(&*self.concept_proc, "concepts", &concept_ids)
                .await?;
        }

        tracing::info!("recovery complete");
        Ok(())
    }

    async fn process_with_progress(
        &self,
        processor: &dyn Processor,
        name: &str,
        ids: &[Id],
    ) -> Result<()> {
        let total = ids.len();
        let mut processed = 0;
        for batch in ids.chunks(self.progress_interval) {
            processor.process(batch).await?;
            if let Err(err) = processor.checkpoint().await {
                tracing::error!(
                    processor = name,
                    error = %err,
                    "error saving checkpoint during recovery"
                );
            }
            processed += batch.len();
            tracing::info!(processor = name, processed, total, "recovery progress");
        }
        Ok(())
    }

    /// Store `messages` as records of `speaker` and queue both enrichment
    /// stages. Returns as soon as the records are committed; enrichment
    /// errors are logged inside the pools and repaired by the next recovery
    /// pass, never surfaced here.
    pub async fn ingest(
        &self,
        speaker: Speaker,
        messages: &[String],
        options: IngestOptions,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let records: Vec<ChatRecord> = messages
            .iter()
            .map(|message| {
                let timestamp = options.timestamp.unwrap_or_else(Utc::now);
                let mut record = ChatRecord::new(speaker, message.clone(), timestamp);
                record.metadata = options.metadata.clone();
                record
            })
            .collect();

        let added = self.chat.add(records)?;
        let ids: Vec<Id> = added.iter().map(|r| r.id).collect();

        let embedding_proc = Arc::clone(&self.embedding_proc);
        let embedding_ids = ids.clone();
        self.embedding_pool.submit(async move {
            if let Err(err) = embedding_proc.process(&embedding_ids).await {
                tracing::error!(error = %err, "error processing embeddings");
                return;
            }
            if let Err(err) = embedding_proc.checkpoint().await {
                tracing::error!(error = %err, "error applying embedding checkpoint");
            }
        });

        let concept_proc = Arc::clone(&self.concept_proc);
        self.concept_pool.submit(async move {
            if let Err(err) = concept_proc.process(&ids).await {
                tracing::error!(error = %err, "error processing concepts");
                return;
            }
            if let Err(err) = concept_proc.checkpoint().await {
                tracing::error!(error = %err, "error applying concept checkpoint");
            }
        });

        Ok(())
    }

    /// Drain and destroy both pools. Safe to call multiple times. The
    /// pipeline accepts no further enrichment work afterwards.
    pub async fn release(&self) {
        self.embedding_pool.release().await;
        self.concept_pool.release().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engram_ai::mock::MockProvider;
    use engram_core::{Checkpoint, ErrorKind};
    use engram_store::testing::memory_stores;
    use std::time::Duration as StdDuration;

    struct Fixture {
        chat: Arc<ChatStore>,
        concepts: Arc<ConceptStore>,
        checkpoints: Arc<CheckpointStore>,
    }

    fn fixture() -> Fixture {
        let (_backend, chat, concepts, checkpoints) = memory_stores();
        Fixture {
            chat: Arc::new(chat),
            concepts: Arc::new(concepts),
            checkpoints: Arc::new(checkpoints),
        }
    }

    async fn pipeline_for(f: &Fixture, provider: Arc<dyn Provider>) -> Pipeline {
        Pipeline::builder()
            .chat_store(Arc::clone(&f.chat))
            .concept_store(Arc::clone(&f.concepts))
            .checkpoint_store(Arc::clone(&f.checkpoints))
            .provider(provider)
            .config(PipelineConfig::default().with_pool_size(2))
            .build()
            .await
            .unwrap()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_builder_requires_every_collaborator() {
        let f = fixture();
        let err = Pipeline::builder()
            .concept_store(Arc::clone(&f.concepts))
            .checkpoint_store(Arc::clone(&f.checkpoints))
            .provider(Arc::new(MockProvider::new()))
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigMissing);
    }

    #[tokio::test]
    async fn test_ingest_empty_batch_is_ok() {
        let f = fixture();
        let pipeline = pipeline_for(&f, Arc::new(MockProvider::new())).await;
        pipeline
            .ingest(Speaker::Human, &[], IngestOptions::default())
            .await
            .unwrap();
        assert!(f.chat.after_id(Id::ZERO).unwrap().is_empty());
        pipeline.release().await;
    }

    #[tokio::test]
    async fn test_ingest_persists_and_enriches() {
        let f = fixture();
        let pipeline = pipeline_for(&f, Arc::new(MockProvider::new())).await;

        let mut metadata = BTreeMap::new();
        metadata.insert("role".to_string(), "user".to_string());
        pipeline
            .ingest(
                Speaker::Human,
                &["alice went to paris".to_string()],
                IngestOptions {
                    metadata,
                    timestamp: Some(Utc::now() - Duration::minutes(1)),
                },
            )
            .await
            .unwrap();

        // The record is visible immediately.
        let records = f.chat.after_id(Id::ZERO).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.get("role").map(String::as_str), Some("user"));

        // Enrichment lands asynchronously.
        let chat = Arc::clone(&f.chat);
        let id = records[0].id;
        wait_for(move || {
            let record = chat.get(id).unwrap();
            !record.vector.is_empty() && !record.concepts.is_empty()
        })
        .await;

        // Both checkpoints converge on the ingested id.
        let checkpoints = Arc::clone(&f.checkpoints);
        wait_for(move || {
            let embedding = checkpoints.load(PROCESSOR_TYPE_EMBEDDING).unwrap();
            let concept = checkpoints.load(PROCESSOR_TYPE_CONCEPT).unwrap();
            matches!((embedding, concept), (Some(e), Some(c)) if e.last_id == id && c.last_id == id)
        })
        .await;

        pipeline.release().await;
    }

    #[tokio::test]
    async fn test_enrichment_errors_do_not_surface_to_ingest() {
        let f = fixture();
        let embedder = engram_ai::mock::MockEmbedder::new()
            .with_embed_texts(|_| Err(Error::external("embedder down")));
        let provider =
            MockProvider::with_parts(embedder, engram_ai::mock::MockExtractor::new());
        let pipeline = pipeline_for(&f, Arc::new(provider)).await;

        pipeline
            .ingest(
                Speaker::Ai,
                &["still stored".to_string()],
                IngestOptions::default(),
            )
            .await
            .unwrap();
        pipeline.release().await;

        // Record persisted despite the failing embedder; no embedding
        // checkpoint was written.
        assert_eq!(f.chat.after_id(Id::ZERO).unwrap().len(), 1);
        assert!(f.checkpoints.load(PROCESSOR_TYPE_EMBEDDING).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recovery_processes_tail_per_processor() {
        let f = fixture();

        // Ten records on disk, embedding checkpoint at id 5, no concept
        // checkpoint.
        let now = Utc::now() - Duration::minutes(10);
        let records: Vec<ChatRecord> = (0..10)
            .map(|i| {
                ChatRecord::new(
                    Speaker::Human,
                    format!("message {i}"),
                    now + Duration::seconds(i),
                )
            })
            .collect();
        let added = f.chat.add(records).unwrap();
        let ids: Vec<Id> = added.iter().map(|r| r.id).collect();
        let fifth = ids[4];
        f.checkpoints
            .save(Checkpoint {
                processor_type: PROCESSOR_TYPE_EMBEDDING.to_string(),
                last_id: fifth,
                updated_at: Utc::now(),
            })
            .unwrap();

        let provider = MockProvider::new();
        let extractor = provider.mock_extractor();
        let pipeline = pipeline_for(&f, Arc::new(provider)).await;

        // Embeddings were recovered only past the checkpoint.
        for id in &ids[..4] {
            assert!(f.chat.get(*id).unwrap().vector.is_empty());
        }
        for id in &ids[5..] {
            assert!(!f.chat.get(*id).unwrap().vector.is_empty());
        }
        // Concepts were recovered for every record.
        assert_eq!(extractor.call_count(), 10);

        // Both checkpoints now read the highest id.
        let last = *ids.last().unwrap();
        assert_eq!(
            f.checkpoints
                .load(PROCESSOR_TYPE_EMBEDDING)
                .unwrap()
                .unwrap()
                .last_id,
            last
        );
        assert_eq!(
            f.checkpoints
                .load(PROCESSOR_TYPE_CONCEPT)
                .unwrap()
                .unwrap()
                .last_id,
            last
        );

        pipeline.release().await;
    }

    #[tokio::test]
    async fn test_recovery_noop_on_empty_database() {
        let f = fixture();
        let provider = MockProvider::new();
        let embedder = provider.mock_embedder();
        let pipeline = pipeline_for(&f, Arc::new(provider)).await;
        assert_eq!(embedder.call_count(), 0);
        pipeline.release().await;
    }

    #[tokio::test]
    async fn test_recovery_failure_aborts_startup() {
        let f = fixture();
        f.chat
            .add(vec![ChatRecord::new(
                Speaker::Human,
                "pending",
                Utc::now() - Duration::minutes(1),
            )])
            .unwrap();

        let embedder = engram_ai::mock::MockEmbedder::new()
            .with_embed_texts(|_| Err(Error::external("still down")));
        let provider =
            MockProvider::with_parts(embedder, engram_ai::mock::MockExtractor::new());

        let err = Pipeline::builder()
            .chat_store(Arc::clone(&f.chat))
            .concept_store(Arc::clone(&f.concepts))
            .checkpoint_store(Arc::clone(&f.checkpoints))
            .provider(Arc::new(provider))
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let f = fixture();
        let pipeline = pipeline_for(&f, Arc::new(MockProvider::new())).await;
        pipeline.release().await;
        pipeline.release().await;
    }
}

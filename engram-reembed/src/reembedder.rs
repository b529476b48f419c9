//! Orchestrators for full-database re-embedding.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use engram_ai::Embedder;
use engram_core::Result;
use engram_store::{ChatStore, ConceptStore};

use crate::batch::{BatchProcessor, ConceptBatchProcessor};
use crate::iterator::{ConceptIterator, RecordIterator};
use crate::progress::ProgressTracker;

/// Configuration shared by the reembedding operations.
#[derive(Debug, Clone)]
pub struct ReembedConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Report progress every this many records.
    pub report_interval: usize,
    /// Attempts per embedding call.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_delay: Duration,
}

impl Default for ReembedConfig {
    fn default() -> Self {
        ReembedConfig {
            batch_size: 100,
            report_interval: 100,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Recomputes the embedding of every chat record in the database.
pub struct Reembedder<W: Write + Send> {
    iterator: RecordIterator,
    processor: BatchProcessor,
    config: ReembedConfig,
    progress: W,
}

impl<W: Write + Send + Clone> Reembedder<W> {
    pub fn new(
        chat: Arc<ChatStore>,
        embedder: Arc<dyn Embedder>,
        config: ReembedConfig,
        progress: W,
    ) -> Self {
        let iterator = RecordIterator::new(Arc::clone(&chat), config.batch_size);
        let processor = BatchProcessor::new(
            chat,
            embedder,
            config.max_retries,
            config.retry_delay,
        );
        Reembedder {
            iterator,
            processor,
            config,
            progress,
        }
    }

    /// Walk the whole corpus in batches, re-embedding each.
    pub async fn run(&mut self) -> Result<()> {
        let batches = self.iterator.batches()?;
        let total: usize = batches.iter().map(Vec::len).sum();
        if total == 0 {
            let _ = writeln!(self.progress, "No records found in database (0 records)");
            return Ok(());
        }

        let _ = writeln!(
            self.progress,
            "Starting reembedding of {total} records (batch size: {})",
            self.config.batch_size
        );

        let tracker =
            ProgressTracker::new(self.progress.clone(), total, self.config.report_interval);
        tracker.start();

        let mut processed = 0;
        for batch in batches {
            let batch_len = batch.len();
            self.processor.process(batch).await?;
            processed += batch_len;
            tracker.update(processed);
        }
        tracker.finish();

        let elapsed = tracker.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            total as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let _ = writeln!(
            self.progress,
            "Reembedding complete. Processed {total} records in {elapsed:.1?} ({rate:.1} records/sec)"
        );
        Ok(())
    }
}

/// Recomputes the embedding of every concept from its tuple.
pub struct ConceptReembedder<W: Write + Send> {
    iterator: ConceptIterator,
    processor: ConceptBatchProcessor,
    config: ReembedConfig,
    progress: W,
}

impl<W: Write + Send + Clone> ConceptReembedder<W> {
    pub fn new(
        concepts: Arc<ConceptStore>,
        embedder: Arc<dyn Embedder>,
        config: ReembedConfig,
        progress: W,
    ) -> Self {
        let iterator = ConceptIterator::new(Arc::clone(&concepts), config.batch_size);
        let processor = ConceptBatchProcessor::new(
            concepts,
            embedder,
            config.max_retries,
            config.retry_delay,
        );
        ConceptReembedder {
            iterator,
            processor,
            config,
            progress,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let batches = self.iterator.batches()?;
        let total: usize = batches.iter().map(Vec::len).sum();
        if total == 0 {
            let _ = writeln!(self.progress, "No concepts found in database (0 concepts)");
            return Ok(());
        }

        let _ = writeln!(
            self.progress,
            "Starting reembedding of {total} concepts (batch size: {})",
            self.config.batch_size
        );

        let tracker =
            ProgressTracker::new(self.progress.clone(), total, self.config.report_interval);
        tracker.start();

        let mut processed = 0;
        for batch in batches {
            let batch_len = batch.len();
            self.processor.process(batch).await?;
            processed += batch_len;
            tracker.update(processed);
        }
        tracker.finish();

        let _ = writeln!(self.progress, "Concept reembedding complete ({total} concepts)");
        Ok(())
    }
}

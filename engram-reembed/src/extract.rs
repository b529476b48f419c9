//! Full-database re-run of the concept-extraction stage.

use std::io::Write;
use std::sync::Arc;

use engram_core::{Id, Result};
use engram_ingest::{ConceptProcessor, Processor};
use engram_store::ChatStore;

use crate::iterator::RecordIterator;
use crate::progress::ProgressTracker;

/// Re-runs concept extraction over every chat record, in batches, through
/// the same processor the ingestion pipeline uses.
pub struct ConceptExtractionRunner<W: Write + Send> {
    iterator: RecordIterator,
    processor: Arc<ConceptProcessor>,
    report_interval: usize,
    progress: W,
}

impl<W: Write + Send + Clone> ConceptExtractionRunner<W> {
    pub fn new(
        chat: Arc<ChatStore>,
        processor: Arc<ConceptProcessor>,
        batch_size: usize,
        report_interval: usize,
        progress: W,
    ) -> Self {
        ConceptExtractionRunner {
            iterator: RecordIterator::new(chat, batch_size),
            processor,
            report_interval,
            progress,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let batches = self.iterator.batches()?;
        let total: usize = batches.iter().map(Vec::len).sum();
        if total == 0 {
            let _ = writeln!(self.progress, "No records found in database (0 records)");
            return Ok(());
        }

        let _ = writeln!(self.progress, "Starting concept extraction of {total} records");
        let tracker = ProgressTracker::new(self.progress.clone(), total, self.report_interval);
        tracker.start();

        let mut processed = 0;
        for batch in batches {
            let ids: Vec<Id> = batch.iter().map(|record| record.id).collect();
            self.processor.process(&ids).await?;
            if let Err(err) = self.processor.checkpoint().await {
                tracing::error!(error = %err, "error saving checkpoint during extraction run");
            }
            processed += ids.len();
            tracker.update(processed);
        }
        tracker.finish();

        let _ = writeln!(self.progress, "Concept extraction complete ({total} records)");
        Ok(())
    }
}

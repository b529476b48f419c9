//! The enrichment-stage contract.

use async_trait::async_trait;
use engram_core::{Id, Result};

/// An enrichment stage over batches of chat-record ids.
///
/// Implementations sort the ids ascending before processing so the
/// checkpointed high-water mark is meaningful, and track that mark
/// monotonically across batches.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Enrich the records identified by `ids`. Implementations decide their
    /// own partial-failure policy; see each processor's documentation.
    async fn process(&self, ids: &[Id]) -> Result<()>;

    /// Persist the current high-water mark. A no-op until the first
    /// successful batch.
    async fn checkpoint(&self) -> Result<()>;
}

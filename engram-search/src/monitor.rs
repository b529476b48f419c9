//! Observation hooks for the search process.

use engram_core::{ChatRecord, Concept, Id, SearchResult};

/// Callbacks fired at each stage of a search.
///
/// Implementations observe only: they must not mutate inputs and must not
/// block, since they run inline with the search. Every method has a no-op
/// default, so implementors override just the stages they care about.
pub trait SearchMonitor: Send + Sync {
    fn start(&self, _query: &str) {}
    fn after_semantic_search(&self, _ids: &[Id]) {}
    fn after_query_concept_extraction(&self, _concepts: &[Concept]) {}
    fn found_related_concepts(&self, _tuple: &str, _concept_ids: &[Id]) {}
    fn after_conceptually_related_search(&self, _ids: &[Id]) {}
    fn after_record_retrieval(&self, _records: &[ChatRecord]) {}
    fn semantic_and_conceptual_hit(&self, _record: &ChatRecord) {}
    fn semantic_hit(&self, _record: &ChatRecord) {}
    fn conceptual_hit(&self, _record: &ChatRecord) {}
    fn finish(&self, _results: &[SearchResult]) {}
}

/// The monitor used when a caller supplies none.
pub struct NoopMonitor;

impl SearchMonitor for NoopMonitor {}

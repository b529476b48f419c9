//! Hybrid searcher: semantic scan, concept lookup, score merge.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use engram_ai::{ConceptExtractor, Embedder, Provider};
use engram_core::types::concept_tuple;
use engram_core::{Concept, Error, Id, Result, SearchResult};
use engram_store::{ChatStore, ConceptStore};

use crate::monitor::{NoopMonitor, SearchMonitor};
use crate::text::contains_all_query_words;

/// Minimum cosine similarity for a semantic hit.
const SEMANTIC_THRESHOLD: f32 = 0.60;
/// Multiplier for records found both semantically and conceptually.
const BOTH_BOOST: f32 = 1.5;
/// Flat score for conceptual-only hits.
const CONCEPTUAL_SCORE: f32 = 1.2;
/// Bonus when every query keyword appears verbatim in the record.
const VERBATIM_BONUS: f32 = 0.3;

pub struct Searcher {
    chat: Arc<ChatStore>,
    concepts: Arc<ConceptStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn ConceptExtractor>,
}

impl Searcher {
    pub fn new(chat: Arc<ChatStore>, concepts: Arc<ConceptStore>, provider: &dyn Provider) -> Self {
        Searcher {
            chat,
            concepts,
            embedder: provider.embedder(),
            extractor: provider.extractor(),
        }
    }

    /// Search for records relevant to `query`, ranked by relevance score,
    /// at most `max_hits` of them.
    pub async fn search(&self, query: &str, max_hits: usize) -> Result<Vec<SearchResult>> {
        self.search_with_monitor(query, max_hits, &NoopMonitor).await
    }

    /// Like [`search`], with stage callbacks delivered to `monitor`.
    ///
    /// Embedder and extractor failures surface to the caller. A concept the
    /// query mentions but the store has never seen is not an error; it
    /// simply cannot contribute hits and is skipped.
    ///
    /// [`search`]: Searcher::search
    pub async fn search_with_monitor(
        &self,
        query: &str,
        max_hits: usize,
        monitor: &dyn SearchMonitor,
    ) -> Result<Vec<SearchResult>> {
        monitor.start(query);

        // Semantic stage.
        let embedding = self.embedder.embed_text(query).await.map_err(|err| {
            tracing::error!(query, error = %err, "error generating embedding for query");
            err
        })?;
        let matches = self
            .chat
            .find_similar(&embedding, SEMANTIC_THRESHOLD, max_hits)?;

        let mut semantic_scores: HashMap<Id, f32> = HashMap::new();
        let mut semantic_ids: Vec<Id> = Vec::with_capacity(matches.len());
        for hit in &matches {
            semantic_scores.insert(hit.record.id, hit.score);
            semantic_ids.push(hit.record.id);
        }
        monitor.after_semantic_search(&semantic_ids);

        // Concept extraction stage: map extracted tuples onto stored
        // concepts, dropping the ones this database has never seen.
        let extracted = self.extractor.extract(query).await.map_err(|err| {
            tracing::error!(error = %err, "error extracting concepts from query");
            err
        })?;
        let mut query_concepts: Vec<Concept> = Vec::with_capacity(extracted.len());
        for concept in &extracted {
            let tuple = concept_tuple(&concept.concept_type, &concept.name);
            match self.concepts.get(Id::from_content(&tuple)) {
                Ok(found) => query_concepts.push(found),
                Err(Error::NotFound) => {
                    tracing::debug!(tuple, "concept not found in database");
                }
                Err(err) => {
                    tracing::warn!(tuple, error = %err, "error looking up concept");
                }
            }
        }
        monitor.after_query_concept_extraction(&query_concepts);

        // Conceptual stage: union the record ids behind each concept.
        let mut conceptual_ids: BTreeSet<Id> = BTreeSet::new();
        for concept in &query_concepts {
            monitor.found_related_concepts(&concept.tuple(), &[concept.id]);
            match self.chat.by_concept(concept.id) {
                Ok(record_ids) => conceptual_ids.extend(record_ids),
                Err(err) => {
                    tracing::warn!(
                        concept_id = concept.id.0,
                        error = %err,
                        "failed to get records for concept"
                    );
                }
            }
        }
        let conceptual_list: Vec<Id> = conceptual_ids.iter().copied().collect();
        monitor.after_conceptually_related_search(&conceptual_list);

        // Union and retrieval.
        let mut union_ids: BTreeSet<Id> = conceptual_ids.clone();
        union_ids.extend(semantic_ids.iter().copied());
        if union_ids.is_empty() {
            monitor.finish(&[]);
            return Ok(Vec::new());
        }
        let unique_ids: Vec<Id> = union_ids.into_iter().collect();
        let records = self.chat.get_many(&unique_ids).map_err(|err| {
            tracing::error!(
                record_count = unique_ids.len(),
                error = %err,
                "error retrieving chat records"
            );
            err
        })?;
        monitor.after_record_retrieval(&records);

        // Scoring and ranking.
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let semantic = semantic_scores.get(&record.id).copied();
            let conceptual = conceptual_ids.contains(&record.id);

            let base = match (semantic, conceptual) {
                (Some(similarity), true) => {
                    monitor.semantic_and_conceptual_hit(&record);
                    BOTH_BOOST * similarity
                }
                (None, true) => {
                    monitor.conceptual_hit(&record);
                    CONCEPTUAL_SCORE
                }
                (Some(similarity), false) => {
                    monitor.semantic_hit(&record);
                    similarity
                }
                // Unreachable: every retrieved id came from one of the two
                // sets, but a record mutated mid-search costs nothing more
                // than a zero base.
                (None, false) => 0.0,
            };

            let bonus = if contains_all_query_words(&record.contents, query) {
                VERBATIM_BONUS
            } else {
                0.0
            };

            results.push(SearchResult {
                record,
                score: base + bonus,
            });
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(max_hits);
        monitor.finish(&results);
        Ok(results)
    }
}

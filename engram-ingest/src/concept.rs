//! Concept-extraction enrichment stage.
//!
//! Classification runs per record (the extractor does not batch), but the
//! resulting tuples are embedded and resolved in one pass per batch, so a
//! concept mentioned by several records is created exactly once. A failing
//! record does not poison the batch: its error is accumulated and every
//! record that classified successfully is still committed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use engram_ai::{ConceptExtractor, Embedder, ExtractedConcept};
use engram_core::types::concept_tuple;
use engram_core::{Checkpoint, ChatRecord, Concept, ConceptRef, Error, Id, Result};
use engram_store::{ChatStore, CheckpointStore, ConceptStore};

use crate::processor::Processor;

/// Checkpoint key of the concept processor.
pub const PROCESSOR_TYPE_CONCEPT: &str = "concept";

/// An extracted concept before it is resolved against the store.
struct RawConcept {
    name: String,
    concept_type: String,
    importance: u8,
}

impl RawConcept {
    fn tuple(&self) -> String {
        concept_tuple(&self.concept_type, &self.name)
    }
}

impl From<&ExtractedConcept> for RawConcept {
    fn from(extracted: &ExtractedConcept) -> Self {
        RawConcept {
            name: extracted.name.clone(),
            concept_type: extracted.concept_type.clone(),
            importance: extracted.importance,
        }
    }
}

/// Where a resolved concept must be placed: which record, which slot in its
/// reference sequence, and the importance the extraction assigned there.
struct SlotRef {
    record_idx: usize,
    slot_idx: usize,
    importance: u8,
}

pub struct ConceptProcessor {
    chat: Arc<ChatStore>,
    concepts: Arc<ConceptStore>,
    checkpoints: Arc<CheckpointStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn ConceptExtractor>,
    context_turns: usize,
    last_id: AtomicU64,
}

impl ConceptProcessor {
    pub fn new(
        chat: Arc<ChatStore>,
        concepts: Arc<ConceptStore>,
        checkpoints: Arc<CheckpointStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn ConceptExtractor>,
        context_turns: usize,
    ) -> Self {
        ConceptProcessor {
            chat,
            concepts,
            checkpoints,
            embedder,
            extractor,
            context_turns,
            last_id: AtomicU64::new(0),
        }
    }

    /// The text presented to the extractor for one record: with
    /// `context_turns` of 0 just the record contents, otherwise the
    /// `context_turns * 2` records before it in the date index, in
    /// chronological order, blank-line joined, with the record itself last.
    fn build_context(&self, record: &ChatRecord) -> Result<String> {
        if self.context_turns == 0 {
            return Ok(record.contents.clone());
        }

        let mut prior = self.chat.before(record.id, self.context_turns * 2)?;
        prior.reverse();

        let mut parts: Vec<&str> = prior.iter().map(|r| r.contents.as_str()).collect();
        parts.push(&record.contents);
        Ok(parts.join("\n\n"))
    }

    /// Embed all unique tuples in one batch, then resolve each through
    /// get-or-create.
    async fn resolve_concepts(&self, raw: &[RawConcept]) -> Result<Vec<Concept>> {
        let tuples: Vec<String> = raw.iter().map(|c| c.tuple()).collect();
        let embeddings = self.embedder.embed_texts(&tuples).await?;
        if embeddings.len() != raw.len() {
            return Err(Error::ResultMismatch {
                expected: raw.len(),
                received: embeddings.len(),
            });
        }

        let mut resolved = Vec::with_capacity(raw.len());
        for (concept, vector) in raw.iter().zip(embeddings) {
            resolved.push(
                self.concepts
                    .get_or_create(&concept.name, &concept.concept_type, vector)?,
            );
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Processor for ConceptProcessor {
    async fn process(&self, ids: &[Id]) -> Result<()> {
        tracing::info!(
            processor = "concepts",
            records = ids.len(),
            "processing records for concepts"
        );

        let mut ids = ids.to_vec();
        ids.sort_unstable();

        let records = self.chat.get_many(&ids)?;
        let mut errors: Vec<Error> = Vec::new();

        // Classify every record and note where each concept id must land.
        // Unique concepts are kept in first-seen order. Records that fail
        // classification get no slot list and are left untouched on disk.
        let mut slots: HashMap<Id, Vec<SlotRef>> = HashMap::new();
        let mut unique: Vec<RawConcept> = Vec::new();
        let mut seen: HashSet<Id> = HashSet::new();
        let mut pending: Vec<(Id, Vec<ConceptRef>)> = Vec::new();

        for (record_idx, record) in records.iter().enumerate() {
            let context = match self.build_context(record) {
                Ok(context) => context,
                Err(err) => {
                    errors.push(Error::external(format!(
                        "record {record_idx} context window failed: {err}"
                    )));
                    continue;
                }
            };

            let extracted = match self.extractor.extract(&context).await {
                Ok(extracted) => extracted,
                Err(err) => {
                    errors.push(Error::external(format!(
                        "record {record_idx} classification failed: {err}"
                    )));
                    continue;
                }
            };

            // Reserve one slot per extracted concept; slots left unresolved
            // are dropped before commit.
            let pending_idx = pending.len();
            pending.push((
                record.id,
                vec![
                    ConceptRef {
                        concept_id: Id::ZERO,
                        importance: 1,
                    };
                    extracted.len()
                ],
            ));

            for (slot_idx, concept) in extracted.iter().enumerate() {
                let raw = RawConcept::from(concept);
                let concept_id = Id::from_content(&raw.tuple());
                slots.entry(concept_id).or_default().push(SlotRef {
                    record_idx: pending_idx,
                    slot_idx,
                    importance: raw.importance,
                });
                if seen.insert(concept_id) {
                    unique.push(raw);
                }
            }
        }

        // Resolve the unique tuples, then distribute the ids back into the
        // reserved slots, preserving slot order and per-record importance.
        let mut resolved = Vec::new();
        if !unique.is_empty() {
            match self.resolve_concepts(&unique).await {
                Ok(concepts) => resolved = concepts,
                Err(err) => {
                    errors.push(Error::external(format!("concept resolution failed: {err}")));
                }
            }
        }

        for concept in &resolved {
            if let Some(positions) = slots.get(&concept.id) {
                for position in positions {
                    pending[position.record_idx].1[position.slot_idx] = ConceptRef {
                        concept_id: concept.id,
                        importance: position.importance,
                    };
                }
            }
        }
        for (_, concepts) in &mut pending {
            concepts.retain(|r| !r.concept_id.is_zero());
        }

        // Commit everything that classified, even when some records failed.
        match self.chat.apply_concepts(pending) {
            Ok(updated) => {
                if let Some(last) = updated.last() {
                    self.last_id.fetch_max(last.id.0, Ordering::SeqCst);
                }
            }
            Err(err) => {
                errors.push(Error::external(format!("update records failed: {err}")));
            }
        }

        if !errors.is_empty() {
            return Err(Error::Composite(errors));
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Result<()> {
        let last_id = self.last_id.load(Ordering::SeqCst);
        if last_id == 0 {
            return Ok(());
        }
        self.checkpoints.save(Checkpoint {
            processor_type: PROCESSOR_TYPE_CONCEPT.to_string(),
            last_id: Id(last_id),
            updated_at: Utc::now(),
        })?;
        Ok(())
    }
}

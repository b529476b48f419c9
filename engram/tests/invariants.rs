//! Structural invariants over the raw keyspace, checked after realistic
//! operation histories: every live record is reachable through its indices,
//! every index entry points at a live record, and recovery leaves no record
//! behind the checkpoints.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use engram::{
    Database, DatabaseOptions, ChatRecord, Id, IngestOptions, PipelineConfig, Speaker,
};
use engram_ai::mock::MockProvider;
use engram_store::backend::Direction;
use engram_store::testing::memory_stores;
use engram_store::{codec, keys, Backend, ChatStore};

/// Check invariants 1-3: primary records and index entries agree exactly.
fn assert_index_consistency(backend: &Backend, chat: &ChatStore) {
    let records = chat.after_id(Id::ZERO).unwrap();

    backend
        .with_read(|scope| {
            // Every record's date and concept entries exist and decode to
            // the record id.
            for record in &records {
                let date_key = keys::chat_date_key(record.timestamp, record.id);
                let value = scope
                    .get(&date_key)?
                    .unwrap_or_else(|| panic!("missing date entry for {}", record.id));
                assert_eq!(codec::decode_id(&value)?, record.id);

                for concept_ref in &record.concepts {
                    let concept_key =
                        keys::chat_concept_key(concept_ref.concept_id, record.id);
                    let value = scope.get(&concept_key)?.unwrap_or_else(|| {
                        panic!("missing concept entry for {}", record.id)
                    });
                    assert_eq!(codec::decode_id(&value)?, record.id);
                }
            }

            // Counting the other way: exactly one date entry per record and
            // one concept entry per reference, no strays.
            let date_entries = scope
                .iter_prefix(keys::CHAT_DATE_PREFIX, Direction::Forward)?
                .count();
            assert_eq!(date_entries, records.len());

            let concept_entries = scope
                .iter_prefix(keys::CHAT_CONCEPT_PREFIX, Direction::Forward)?
                .count();
            let total_refs: usize = records.iter().map(|r| r.concepts.len()).sum();
            assert_eq!(concept_entries, total_refs);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_indices_track_adds_updates_and_deletes() {
    let (backend, chat, concepts, _checkpoints) = memory_stores();
    let base = Utc::now() - ChronoDuration::hours(3);

    let added = chat
        .add(
            (0..6)
                .map(|i| {
                    ChatRecord::new(
                        Speaker::Human,
                        format!("message {i}"),
                        base + ChronoDuration::minutes(i),
                    )
                })
                .collect(),
        )
        .unwrap();
    assert_index_consistency(&backend, &chat);

    // Enrich half the records with concepts.
    let alice = concepts.get_or_create("alice", "person", vec![1.0]).unwrap();
    let paris = concepts.get_or_create("paris", "place", vec![1.0]).unwrap();
    for (i, record) in added.iter().enumerate().take(3) {
        let refs = if i % 2 == 0 {
            vec![
                engram::ConceptRef { concept_id: alice.id, importance: 9 },
                engram::ConceptRef { concept_id: paris.id, importance: 5 },
            ]
        } else {
            vec![engram::ConceptRef { concept_id: alice.id, importance: 3 }]
        };
        chat.apply_concepts(vec![(record.id, refs)]).unwrap();
    }
    assert_index_consistency(&backend, &chat);

    // Move one record in time and change another's refs.
    let mut moved = chat.get(added[0].id).unwrap();
    moved.timestamp = base + ChronoDuration::hours(1);
    chat.update(vec![moved]).unwrap();
    chat.apply_concepts(vec![(
        added[1].id,
        vec![engram::ConceptRef { concept_id: paris.id, importance: 8 }],
    )])
    .unwrap();
    assert_index_consistency(&backend, &chat);

    // Delete a mix of enriched and plain records.
    chat.delete(&[added[0].id, added[4].id]).unwrap();
    assert_index_consistency(&backend, &chat);

    // The tuple index resolves every live concept to itself.
    for concept in concepts.all().unwrap() {
        let found = concepts
            .find_by_tuple(&concept.name, &concept.concept_type)
            .unwrap();
        assert_eq!(found.id, concept.id);
        assert_eq!(
            concept.id,
            Id::from_content(&concept.tuple()),
            "content-derived id"
        );
    }
}

#[tokio::test]
async fn test_recovery_leaves_no_record_behind_checkpoints() {
    let dir = tempfile::TempDir::new().unwrap();

    // First life: ingest with a provider whose embedder fails, so records
    // persist unenriched and no embedding checkpoint is written.
    {
        let embedder = engram_ai::mock::MockEmbedder::new()
            .with_embed_texts(|_| Err(engram::Error::External("offline".to_string())));
        let provider = MockProvider::with_parts(embedder, engram_ai::mock::MockExtractor::new());
        let db = Database::open(
            dir.path(),
            DatabaseOptions::default().with_provider(Arc::new(provider)),
        )
        .unwrap();
        let pipeline = db.pipeline(PipelineConfig::default()).await.unwrap();
        pipeline
            .ingest(
                Speaker::Human,
                &(0..7).map(|i| format!("stranded {i}")).collect::<Vec<_>>(),
                IngestOptions {
                    metadata: Default::default(),
                    timestamp: Some(Utc::now() - ChronoDuration::minutes(5)),
                },
            )
            .await
            .unwrap();
        pipeline.release().await;
        db.close().unwrap();
    }

    // Second life: a healthy provider. Building the pipeline runs recovery
    // before returning.
    let db = Database::open(
        dir.path(),
        DatabaseOptions::default().with_provider(Arc::new(MockProvider::new())),
    )
    .unwrap();
    let pipeline = db.pipeline(PipelineConfig::default()).await.unwrap();

    let records = db.chat_store().after_id(Id::ZERO).unwrap();
    assert_eq!(records.len(), 7);
    let max_id = records.iter().map(|r| r.id).max().unwrap();

    // Invariant: after recovery, both checkpoints are at or past every
    // record that existed before startup.
    let embedding = db
        .checkpoint_store()
        .load("embedding")
        .unwrap()
        .expect("embedding checkpoint exists after recovery");
    let concept = db
        .checkpoint_store()
        .load("concept")
        .unwrap()
        .expect("concept checkpoint exists after recovery");
    assert!(embedding.last_id.min(concept.last_id) >= max_id);

    // And the records are actually enriched.
    for record in &records {
        assert!(!record.vector.is_empty(), "record {} embedded", record.id);
    }

    pipeline.release().await;
    db.close().unwrap();
}

#[tokio::test]
async fn test_checkpoints_survive_reopen_and_skip_done_work() {
    let dir = tempfile::TempDir::new().unwrap();
    let timestamp = Utc::now() - ChronoDuration::minutes(10);

    {
        let db = Database::open(
            dir.path(),
            DatabaseOptions::default().with_provider(Arc::new(MockProvider::new())),
        )
        .unwrap();
        let pipeline = db.pipeline(PipelineConfig::default()).await.unwrap();
        pipeline
            .ingest(
                Speaker::Ai,
                &["finished work".to_string()],
                IngestOptions {
                    metadata: Default::default(),
                    timestamp: Some(timestamp),
                },
            )
            .await
            .unwrap();

        // Wait until both checkpoints are written before shutting down.
        let checkpoints = db.checkpoint_store();
        for _ in 0..300 {
            let embedding = checkpoints.load("embedding").unwrap();
            let concept = checkpoints.load("concept").unwrap();
            if embedding.is_some() && concept.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pipeline.release().await;
        db.close().unwrap();
    }

    // On reopen, recovery finds nothing to do: a provider that would fail
    // if called proves the processors are never invoked.
    let embedder = engram_ai::mock::MockEmbedder::new()
        .with_embed_texts(|_| Err(engram::Error::External("must not be called".to_string())));
    let extractor = engram_ai::mock::MockExtractor::new()
        .with_extract(|_| Err(engram::Error::External("must not be called".to_string())));
    let db = Database::open(
        dir.path(),
        DatabaseOptions::default()
            .with_provider(Arc::new(MockProvider::with_parts(embedder, extractor))),
    )
    .unwrap();
    let pipeline = db.pipeline(PipelineConfig::default()).await.unwrap();
    pipeline.release().await;
    db.close().unwrap();
}

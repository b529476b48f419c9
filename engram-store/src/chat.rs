//! Chat-record store: primary CRUD plus the date and concept indices.
//!
//! Every mutating operation runs in a single write scope so a record and its
//! index entries never diverge. The store owns the chat id sequence for the
//! life of the process; callers must close the store (releasing the
//! sequence) before closing the backend.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use engram_core::{
    validation, ChatRecord, Clock, Concept, ConceptRef, Error, Id, Result, SystemClock,
};

use crate::backend::{Backend, Direction, Sequence, WriteScope};
use crate::{codec, keys};

/// Ids leased from the sequence per transaction.
const SEQUENCE_BANDWIDTH: u64 = 100;

pub struct ChatStore {
    pub(crate) backend: Backend,
    sequence: Mutex<Sequence>,
    clock: Arc<dyn Clock>,
}

impl ChatStore {
    pub fn new(backend: &Backend) -> Result<Self> {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Build a store with an injected clock. Tests use this to make
    /// timestamp validation and stamping deterministic.
    pub fn with_clock(backend: &Backend, clock: Arc<dyn Clock>) -> Result<Self> {
        let sequence = backend.sequence(keys::CHAT_ID_SEQUENCE, SEQUENCE_BANDWIDTH)?;
        Ok(ChatStore {
            backend: backend.clone(),
            sequence: Mutex::new(sequence),
            clock,
        })
    }

    /// Release the id sequence. Call before closing the backend. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.sequence.lock().release()
    }

    /// Add records, allocating ids and stamping insertion times. Records
    /// arriving with id 0 get a fresh sequence id (a drawn 0 is skipped,
    /// id 0 stays reserved). The primary record, its date-index entry, and
    /// one concept-index entry per reference are written in one scope; any
    /// failure aborts the whole batch.
    pub fn add(&self, mut records: Vec<ChatRecord>) -> Result<Vec<ChatRecord>> {
        let now = self.clock.now();
        for record in &records {
            validation::validate_chat_record(record, now)?;
        }

        {
            let mut sequence = self.sequence.lock();
            for record in &mut records {
                if record.id.is_zero() {
                    let mut next = sequence.next()?;
                    if next == 0 {
                        next = sequence.next()?;
                    }
                    record.id = Id(next);
                }
            }
        }

        self.backend.with_write(|scope| {
            for record in &mut records {
                record.inserted_at = now;
                record.updated_at = now;
                scope.set(
                    &keys::chat_record_key(record.id),
                    &codec::encode_chat_record(record),
                )?;
                scope.set(
                    &keys::chat_date_key(record.timestamp, record.id),
                    &codec::encode_id(record.id),
                )?;
                write_concept_index(scope, record)?;
            }
            Ok(())
        })?;
        Ok(records)
    }

    /// Update existing records. Fails with NotFound if any is absent. Moves
    /// the date-index entry when the timestamp changed and rewrites the
    /// concept-index entries when the reference sequence changed (by id or
    /// importance, in order).
    pub fn update(&self, mut records: Vec<ChatRecord>) -> Result<Vec<ChatRecord>> {
        let now = self.clock.now();
        self.backend.with_write(|scope| {
            for record in &mut records {
                let key = keys::chat_record_key(record.id);
                let old = match scope.get(&key)? {
                    Some(raw) => codec::decode_chat_record(&raw)?,
                    None => return Err(Error::NotFound),
                };

                record.updated_at = now;
                scope.set(&key, &codec::encode_chat_record(record))?;

                if old.timestamp != record.timestamp {
                    scope.delete(&keys::chat_date_key(old.timestamp, old.id))?;
                    scope.set(
                        &keys::chat_date_key(record.timestamp, record.id),
                        &codec::encode_id(record.id),
                    )?;
                }

                if old.concepts != record.concepts {
                    delete_concept_index(scope, &old)?;
                    write_concept_index(scope, record)?;
                }
            }
            Ok(())
        })?;
        Ok(records)
    }

    /// Commit embedding vectors. Each record is re-read inside the write
    /// scope and only its vector replaced, so this never clobbers a
    /// concurrent concept commit for the same record. Fails with NotFound
    /// if any id is absent.
    pub fn apply_vectors(&self, vectors: Vec<(Id, Vec<f32>)>) -> Result<Vec<ChatRecord>> {
        let now = self.clock.now();
        self.backend.with_write(|scope| {
            let mut updated = Vec::with_capacity(vectors.len());
            for (id, vector) in &vectors {
                let key = keys::chat_record_key(*id);
                let mut record = match scope.get(&key)? {
                    Some(raw) => codec::decode_chat_record(&raw)?,
                    None => return Err(Error::NotFound),
                };
                record.vector = vector.clone();
                record.updated_at = now;
                scope.set(&key, &codec::encode_chat_record(&record))?;
                updated.push(record);
            }
            Ok(updated)
        })
    }

    /// Commit extracted concept references and maintain the concept index.
    /// The counterpart of [`apply_vectors`] for the other enrichment field;
    /// the two may run concurrently against the same records without losing
    /// either field.
    ///
    /// [`apply_vectors`]: ChatStore::apply_vectors
    pub fn apply_concepts(&self, updates: Vec<(Id, Vec<ConceptRef>)>) -> Result<Vec<ChatRecord>> {
        let now = self.clock.now();
        self.backend.with_write(|scope| {
            let mut updated = Vec::with_capacity(updates.len());
            for (id, concepts) in &updates {
                let key = keys::chat_record_key(*id);
                let mut record = match scope.get(&key)? {
                    Some(raw) => codec::decode_chat_record(&raw)?,
                    None => return Err(Error::NotFound),
                };
                if record.concepts != *concepts {
                    delete_concept_index(scope, &record)?;
                    record.concepts = concepts.clone();
                    write_concept_index(scope, &record)?;
                }
                record.updated_at = now;
                scope.set(&key, &codec::encode_chat_record(&record))?;
                updated.push(record);
            }
            Ok(updated)
        })
    }

    /// Delete records and all their index entries. Fails with NotFound if
    /// any id is absent; nothing is deleted in that case.
    pub fn delete(&self, ids: &[Id]) -> Result<()> {
        self.backend.with_write(|scope| {
            for id in ids {
                let key = keys::chat_record_key(*id);
                let record = match scope.get(&key)? {
                    Some(raw) => codec::decode_chat_record(&raw)?,
                    None => return Err(Error::NotFound),
                };
                scope.delete(&keys::chat_date_key(record.timestamp, record.id))?;
                delete_concept_index(scope, &record)?;
                scope.delete(&key)?;
            }
            Ok(())
        })
    }

    /// Fetch one record. Fails with NotFound if absent.
    pub fn get(&self, id: Id) -> Result<ChatRecord> {
        self.backend.with_read(|scope| {
            match scope.get(&keys::chat_record_key(id))? {
                Some(raw) => codec::decode_chat_record(&raw),
                None => Err(Error::NotFound),
            }
        })
    }

    /// Fetch many records, silently dropping missing ids.
    pub fn get_many(&self, ids: &[Id]) -> Result<Vec<ChatRecord>> {
        self.backend.with_read(|scope| {
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(raw) = scope.get(&keys::chat_record_key(*id))? {
                    records.push(codec::decode_chat_record(&raw)?);
                }
            }
            Ok(records)
        })
    }

    /// Records with `start <= timestamp < end`, ascending by timestamp.
    /// When `start == end` the range covers exactly that microsecond.
    pub fn by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChatRecord>> {
        let end = if start == end {
            end + Duration::microseconds(1)
        } else {
            end
        };
        self.backend.with_read(|scope| {
            let start_key = keys::partial_chat_date_key(start);
            let end_key = keys::partial_chat_date_key(end);
            let mut records = Vec::new();
            for entry in scope.range(&start_key, &end_key)? {
                let (_, value) = entry?;
                let id = codec::decode_id(&value)?;
                if let Some(raw) = scope.get(&keys::chat_record_key(id))? {
                    records.push(codec::decode_chat_record(&raw)?);
                }
            }
            Ok(records)
        })
    }

    /// The `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ChatRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.backend.with_read(|scope| {
            let mut records = Vec::with_capacity(limit);
            for entry in scope.iter_prefix(keys::CHAT_DATE_PREFIX, Direction::Reverse)? {
                let (_, value) = entry?;
                let id = codec::decode_id(&value)?;
                if let Some(raw) = scope.get(&keys::chat_record_key(id))? {
                    records.push(codec::decode_chat_record(&raw)?);
                    if records.len() == limit {
                        break;
                    }
                }
            }
            Ok(records)
        })
    }

    /// Up to `limit` records strictly before the reference record in the
    /// date index, newest first. Fails with NotFound if the reference does
    /// not exist. Used for lazy-loading older history and for building
    /// extraction context windows.
    pub fn before(&self, id: Id, limit: usize) -> Result<Vec<ChatRecord>> {
        let reference = self.get(id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.backend.with_read(|scope| {
            let upper = keys::chat_date_key(reference.timestamp, id);
            let mut records = Vec::with_capacity(limit);
            for entry in scope.range_rev_inclusive(keys::CHAT_DATE_PREFIX, &upper)? {
                let (_, value) = entry?;
                let record_id = codec::decode_id(&value)?;
                if record_id == id {
                    continue;
                }
                if let Some(raw) = scope.get(&keys::chat_record_key(record_id))? {
                    records.push(codec::decode_chat_record(&raw)?);
                    if records.len() == limit {
                        break;
                    }
                }
            }
            Ok(records)
        })
    }

    /// Ids of all records referencing the given concept.
    pub fn by_concept(&self, concept_id: Id) -> Result<Vec<Id>> {
        self.backend.with_read(|scope| {
            let prefix = keys::partial_chat_concept_key(concept_id);
            let mut ids = Vec::new();
            for entry in scope.iter_prefix(&prefix, Direction::Forward)? {
                let (_, value) = entry?;
                ids.push(codec::decode_id(&value)?);
            }
            Ok(ids)
        })
    }

    /// The distinct concepts referenced by records in the given range,
    /// resolved to full concept records, in first-seen order.
    pub fn concepts_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Concept>> {
        let records = self.by_date_range(start, end)?;
        let mut seen = HashSet::new();
        let mut concept_ids = Vec::new();
        for record in &records {
            for concept_ref in &record.concepts {
                if seen.insert(concept_ref.concept_id) {
                    concept_ids.push(concept_ref.concept_id);
                }
            }
        }
        self.backend.with_read(|scope| {
            let mut concepts = Vec::with_capacity(concept_ids.len());
            for id in concept_ids {
                if let Some(raw) = scope.get(&keys::concept_key(id))? {
                    concepts.push(codec::decode_concept(&raw)?);
                }
            }
            Ok(concepts)
        })
    }

    /// All records with id strictly greater than `after`, ascending by id.
    /// Recovery uses this to find records the processors have not reached.
    pub fn after_id(&self, after: Id) -> Result<Vec<ChatRecord>> {
        let mut records = self.backend.with_read(|scope| {
            let mut records = Vec::new();
            for entry in scope.iter_prefix(keys::CHAT_RECORD_PREFIX, Direction::Forward)? {
                let (key, value) = entry?;
                if !keys::is_chat_record_key(&key) {
                    continue;
                }
                let record = codec::decode_chat_record(&value).map_err(|err| {
                    tracing::error!(
                        key = %String::from_utf8_lossy(&key),
                        error = %err,
                        "corrupt chat record"
                    );
                    err
                })?;
                if record.id > after {
                    records.push(record);
                }
            }
            Ok(records)
        })?;
        records.sort_by_key(|record| record.id);
        Ok(records)
    }
}

fn write_concept_index(scope: &mut WriteScope<'_>, record: &ChatRecord) -> Result<()> {
    for concept_ref in &record.concepts {
        scope.set(
            &keys::chat_concept_key(concept_ref.concept_id, record.id),
            &codec::encode_id(record.id),
        )?;
    }
    Ok(())
}

fn delete_concept_index(scope: &mut WriteScope<'_>, record: &ChatRecord) -> Result<()> {
    for concept_ref in &record.concepts {
        scope.delete(&keys::chat_concept_key(concept_ref.concept_id, record.id))?;
    }
    Ok(())
}

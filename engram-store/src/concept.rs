//! Concept store: primary CRUD plus the unique (name, type) tuple index.

use std::sync::Arc;

use chrono::Utc;

use engram_core::{validation, Clock, Concept, Error, Id, Result, SystemClock};

use crate::backend::{Backend, Direction};
use crate::{codec, keys};

pub struct ConceptStore {
    pub(crate) backend: Backend,
    clock: Arc<dyn Clock>,
}

impl ConceptStore {
    pub fn new(backend: &Backend) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: &Backend, clock: Arc<dyn Clock>) -> Self {
        ConceptStore {
            backend: backend.clone(),
            clock,
        }
    }

    /// Release store resources. The concept store owns none; this exists so
    /// callers can close every store uniformly before the backend.
    pub fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Add concepts. A concept arriving with id 0 gets the content-derived
    /// id of its tuple. The primary record and the tuple-index entry are
    /// written in one scope.
    pub fn add(&self, mut concepts: Vec<Concept>) -> Result<Vec<Concept>> {
        let now = self.clock.now();
        for concept in &concepts {
            validation::validate_concept(concept)?;
        }
        self.backend.with_write(|scope| {
            for concept in &mut concepts {
                if concept.id.is_zero() {
                    concept.id = Id::from_content(&concept.tuple());
                }
                concept.inserted_at = now;
                concept.updated_at = now;
                scope.set(&keys::concept_key(concept.id), &codec::encode_concept(concept))?;
                scope.set(
                    &keys::concept_tuple_key(&concept.name, &concept.concept_type),
                    &codec::encode_id(concept.id),
                )?;
            }
            Ok(())
        })?;
        Ok(concepts)
    }

    /// Update existing concepts, moving the tuple-index entry atomically
    /// when name or type changed. Fails with NotFound if any is absent.
    pub fn update(&self, mut concepts: Vec<Concept>) -> Result<Vec<Concept>> {
        let now = self.clock.now();
        self.backend.with_write(|scope| {
            for concept in &mut concepts {
                let key = keys::concept_key(concept.id);
                let old = match scope.get(&key)? {
                    Some(raw) => codec::decode_concept(&raw)?,
                    None => return Err(Error::NotFound),
                };

                concept.updated_at = now;
                scope.set(&key, &codec::encode_concept(concept))?;

                if old.name != concept.name || old.concept_type != concept.concept_type {
                    scope.delete(&keys::concept_tuple_key(&old.name, &old.concept_type))?;
                    scope.set(
                        &keys::concept_tuple_key(&concept.name, &concept.concept_type),
                        &codec::encode_id(concept.id),
                    )?;
                }
            }
            Ok(())
        })?;
        Ok(concepts)
    }

    /// Delete concepts and their tuple-index entries. Fails with NotFound if
    /// any id is absent.
    pub fn delete(&self, ids: &[Id]) -> Result<()> {
        self.backend.with_write(|scope| {
            for id in ids {
                let key = keys::concept_key(*id);
                let concept = match scope.get(&key)? {
                    Some(raw) => codec::decode_concept(&raw)?,
                    None => return Err(Error::NotFound),
                };
                scope.delete(&keys::concept_tuple_key(&concept.name, &concept.concept_type))?;
                scope.delete(&key)?;
            }
            Ok(())
        })
    }

    /// Fetch one concept. Fails with NotFound if absent.
    pub fn get(&self, id: Id) -> Result<Concept> {
        self.backend
            .with_read(|scope| match scope.get(&keys::concept_key(id))? {
                Some(raw) => codec::decode_concept(&raw),
                None => Err(Error::NotFound),
            })
    }

    /// Fetch many concepts, silently dropping missing ids.
    pub fn get_many(&self, ids: &[Id]) -> Result<Vec<Concept>> {
        self.backend.with_read(|scope| {
            let mut concepts = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(raw) = scope.get(&keys::concept_key(*id))? {
                    concepts.push(codec::decode_concept(&raw)?);
                }
            }
            Ok(concepts)
        })
    }

    /// Resolve a concept by its (name, type) tuple. Both the index read and
    /// the primary read happen in one snapshot.
    pub fn find_by_tuple(&self, name: &str, concept_type: &str) -> Result<Concept> {
        self.backend.with_read(|scope| {
            let raw_id = scope
                .get(&keys::concept_tuple_key(name, concept_type))?
                .ok_or(Error::NotFound)?;
            let id = codec::decode_id(&raw_id)?;
            match scope.get(&keys::concept_key(id))? {
                Some(raw) => codec::decode_concept(&raw),
                None => Err(Error::NotFound),
            }
        })
    }

    /// Find the concept for the tuple, creating it with the content-derived
    /// id and the given vector if absent. When a concurrent writer inserts
    /// the same tuple between the failed lookup and our add, the retry
    /// lookup returns that writer's concept; the tuple of the returned
    /// concept always matches the request.
    pub fn get_or_create(
        &self,
        name: &str,
        concept_type: &str,
        vector: Vec<f32>,
    ) -> Result<Concept> {
        match self.find_by_tuple(name, concept_type) {
            Ok(concept) => return Ok(concept),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let fresh = Concept::new(name, concept_type, vector, Utc::now());
        match self.add(vec![fresh]) {
            Ok(mut added) => Ok(added.remove(0)),
            Err(add_err) => match self.find_by_tuple(name, concept_type) {
                Ok(concept) => Ok(concept),
                Err(_) => Err(add_err),
            },
        }
    }

    /// All concepts, in primary-key order.
    pub fn all(&self) -> Result<Vec<Concept>> {
        self.backend.with_read(|scope| {
            let mut concepts = Vec::new();
            for entry in scope.iter_prefix(keys::CONCEPT_RECORD_PREFIX, Direction::Forward)? {
                let (_, value) = entry?;
                concepts.push(codec::decode_concept(&value)?);
            }
            Ok(concepts)
        })
    }
}

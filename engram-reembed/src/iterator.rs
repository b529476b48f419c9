//! Full-corpus iteration in batches.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use engram_core::{ChatRecord, Concept, Result};
use engram_store::{ChatStore, ConceptStore};

/// Default records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Iterates every chat record in the database in timestamp order, split
/// into batches for the processors.
pub struct RecordIterator {
    chat: Arc<ChatStore>,
    batch_size: usize,
}

impl RecordIterator {
    pub fn new(chat: Arc<ChatStore>, batch_size: usize) -> Self {
        RecordIterator {
            chat,
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
        }
    }

    /// Load all records and return them chunked. The date index covers
    /// every record, so a full-width range scan reaches them all.
    pub fn batches(&self) -> Result<Vec<Vec<ChatRecord>>> {
        let start = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single();
        let end = Utc.with_ymd_and_hms(2100, 12, 31, 23, 59, 59).single();
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(Vec::new());
        };

        let records = self.chat.by_date_range(start, end)?;
        Ok(chunk(records, self.batch_size))
    }
}

/// Iterates every concept in the database, split into batches.
pub struct ConceptIterator {
    concepts: Arc<ConceptStore>,
    batch_size: usize,
}

impl ConceptIterator {
    pub fn new(concepts: Arc<ConceptStore>, batch_size: usize) -> Self {
        ConceptIterator {
            concepts,
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
        }
    }

    pub fn batches(&self) -> Result<Vec<Vec<Concept>>> {
        let concepts = self.concepts.all()?;
        Ok(chunk(concepts, self.batch_size))
    }
}

fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

//! Checkpoint store: per-processor {last processed id, updated at}.

use std::sync::Arc;

use engram_core::{Checkpoint, Clock, Result, SystemClock};

use crate::backend::Backend;
use crate::{codec, keys};

pub struct CheckpointStore {
    backend: Backend,
    clock: Arc<dyn Clock>,
}

impl CheckpointStore {
    pub fn new(backend: &Backend) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: &Backend, clock: Arc<dyn Clock>) -> Self {
        CheckpointStore {
            backend: backend.clone(),
            clock,
        }
    }

    /// Persist the checkpoint under its processor key, stamping
    /// `updated_at` with the store clock. Returns the stamped checkpoint.
    pub fn save(&self, mut checkpoint: Checkpoint) -> Result<Checkpoint> {
        checkpoint.updated_at = self.clock.now();
        self.backend.with_write(|scope| {
            scope.set(
                &keys::checkpoint_key(&checkpoint.processor_type),
                &codec::encode_checkpoint(&checkpoint),
            )
        })?;
        Ok(checkpoint)
    }

    /// Load the checkpoint for a processor type, or None if it has never
    /// been saved.
    pub fn load(&self, processor_type: &str) -> Result<Option<Checkpoint>> {
        self.backend.with_read(|scope| {
            match scope.get(&keys::checkpoint_key(processor_type))? {
                Some(raw) => Ok(Some(codec::decode_checkpoint(&raw)?)),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use engram_core::{Id, ManualClock};

    #[test]
    fn test_load_absent_returns_none() {
        let backend = Backend::open("", true).unwrap();
        let store = CheckpointStore::new(&backend);
        assert!(store.load("embedding").unwrap().is_none());
    }

    #[test]
    fn test_save_stamps_and_round_trips() {
        let backend = Backend::open("", true).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = CheckpointStore::with_clock(&backend, clock.clone());

        let saved = store
            .save(Checkpoint {
                processor_type: "embedding".to_string(),
                last_id: Id(17),
                updated_at: Utc::now() - Duration::days(30),
            })
            .unwrap();
        assert_eq!(saved.updated_at, clock.now());

        let loaded = store.load("embedding").unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_checkpoints_are_per_processor() {
        let backend = Backend::open("", true).unwrap();
        let store = CheckpointStore::new(&backend);

        store
            .save(Checkpoint {
                processor_type: "embedding".to_string(),
                last_id: Id(5),
                updated_at: Utc::now(),
            })
            .unwrap();
        store
            .save(Checkpoint {
                processor_type: "concept".to_string(),
                last_id: Id(9),
                updated_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(store.load("embedding").unwrap().unwrap().last_id, Id(5));
        assert_eq!(store.load("concept").unwrap().unwrap().last_id, Id(9));
    }

    #[test]
    fn test_save_overwrites() {
        let backend = Backend::open("", true).unwrap();
        let store = CheckpointStore::new(&backend);
        for last in [3u64, 8, 21] {
            store
                .save(Checkpoint {
                    processor_type: "concept".to_string(),
                    last_id: Id(last),
                    updated_at: Utc::now(),
                })
                .unwrap();
        }
        assert_eq!(store.load("concept").unwrap().unwrap().last_id, Id(21));
    }
}

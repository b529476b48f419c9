//! Shared fixtures for tests in this crate and the crates above it.

use std::sync::Arc;

use engram_core::Clock;

use crate::{Backend, ChatStore, CheckpointStore, ConceptStore};

/// An in-memory backend, panicking on failure. Test-only convenience.
pub fn memory_backend() -> Backend {
    Backend::open("", true).expect("in-memory backend")
}

/// An in-memory backend plus all three stores over it.
pub fn memory_stores() -> (Backend, ChatStore, ConceptStore, CheckpointStore) {
    let backend = memory_backend();
    let chat = ChatStore::new(&backend).expect("chat store");
    let concepts = ConceptStore::new(&backend);
    let checkpoints = CheckpointStore::new(&backend);
    (backend, chat, concepts, checkpoints)
}

/// Like [`memory_stores`], with every store on the given clock.
pub fn memory_stores_with_clock(
    clock: Arc<dyn Clock>,
) -> (Backend, ChatStore, ConceptStore, CheckpointStore) {
    let backend = memory_backend();
    let chat = ChatStore::with_clock(&backend, Arc::clone(&clock)).expect("chat store");
    let concepts = ConceptStore::with_clock(&backend, Arc::clone(&clock));
    let checkpoints = CheckpointStore::with_clock(&backend, clock);
    (backend, chat, concepts, checkpoints)
}

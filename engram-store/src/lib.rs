//! engram-store - Persistent storage for the engram engine.
//!
//! Layers, bottom up:
//! - [`backend`]: an ordered byte-key/byte-value store over redb with
//!   transactional scopes, prefix iteration, and leased id sequences.
//! - [`codec`]: the deterministic binary format every record is persisted in.
//! - [`keys`]: the key schema mapping domain queries to byte-key ranges.
//! - [`chat`], [`concept`], [`checkpoint`]: the domain stores, each keeping
//!   its secondary indices consistent inside one transaction per operation.
//! - [`scan`]: the linear vector-similarity scan over chat records.
//!
//! The backend does not interpret keys; everything above it does.

pub mod backend;
pub mod checkpoint;
pub mod codec;
pub mod keys;
pub mod testing;

mod chat;
mod concept;
mod scan;

pub use backend::{Backend, Direction, Sequence};
pub use chat::ChatStore;
pub use checkpoint::CheckpointStore;
pub use concept::ConceptStore;

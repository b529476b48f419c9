//! engram-core - Domain types for the engram semantic-memory engine
//!
//! This crate defines the entities shared by every layer: chat records,
//! concepts, checkpoints, the workspace error taxonomy, domain validation,
//! and the injectable clock. It has no storage or I/O dependencies.

pub mod error;
pub mod time;
pub mod types;
pub mod validation;

pub use error::{Error, ErrorKind, Result};
pub use time::{Clock, ManualClock, SystemClock};
pub use types::{ChatRecord, Checkpoint, Concept, ConceptRef, Id, SearchResult, Speaker};

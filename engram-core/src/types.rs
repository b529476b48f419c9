//! Domain entities persisted and exchanged by the engine.

use std::collections::BTreeMap;

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// BLAKE2b configured for a 64-bit digest.
type Blake2b64 = Blake2b<U8>;

/// Unique identifier for domain entities.
///
/// Chat-record ids come from the store's monotonic sequence; concept ids are
/// derived from content via [`Id::from_content`]. Id 0 is reserved and never
/// assigned to a live record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Id(pub u64);

impl Id {
    /// The reserved zero id, used to mark "not yet assigned".
    pub const ZERO: Id = Id(0);

    /// Derive a deterministic id from text content using BLAKE2b-64.
    ///
    /// Identical content always produces an identical id, which is what makes
    /// concept ids content-addressed.
    pub fn from_content(text: &str) -> Self {
        let digest = Blake2b64::digest(text.as_bytes());
        Id(u64::from_le_bytes(digest.into()))
    }

    /// Whether this is the reserved zero id.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value)
    }
}

/// The source of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// A human user.
    Human,
    /// An AI assistant.
    Ai,
}

impl Speaker {
    /// The byte this speaker is persisted as.
    pub const fn wire(self) -> u8 {
        match self {
            Speaker::Human => 1,
            Speaker::Ai => 2,
        }
    }

    /// Decode a persisted speaker byte. Any value other than the two known
    /// cases is rejected.
    pub fn from_wire(value: u8) -> Option<Speaker> {
        match value {
            1 => Some(Speaker::Human),
            2 => Some(Speaker::Ai),
            _ => None,
        }
    }
}

/// A single message in a conversation.
///
/// Records are created by ingestion and enriched asynchronously: the
/// embedding processor fills `vector`, the concept processor fills
/// `concepts`. Both fields stay empty until their processor has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: Id,
    pub speaker: Speaker,
    pub contents: String,
    /// When the message was originally sent.
    pub timestamp: DateTime<Utc>,
    /// When the record was inserted into the database.
    pub inserted_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Concepts extracted from the message, in extractor order.
    pub concepts: Vec<ConceptRef>,
    /// Embedding vector for semantic search.
    pub vector: Vec<f32>,
    /// Optional metadata (e.g. "role", "provider", "model").
    pub metadata: BTreeMap<String, String>,
}

impl ChatRecord {
    /// Build an unenriched record ready for ingestion. The insertion
    /// timestamps are placeholders; the chat store stamps them on add.
    pub fn new(speaker: Speaker, contents: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        ChatRecord {
            id: Id::ZERO,
            speaker,
            contents: contents.into(),
            timestamp,
            inserted_at: timestamp,
            updated_at: timestamp,
            concepts: Vec::new(),
            vector: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A domain concept extracted from one or more chat messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: Id,
    pub name: String,
    #[serde(rename = "type")]
    pub concept_type: String,
    /// Embedding vector for the concept tuple.
    pub vector: Vec<f32>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// Build a concept with a content-derived id.
    pub fn new(
        name: impl Into<String>,
        concept_type: impl Into<String>,
        vector: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let concept_type = concept_type.into();
        let id = Id::from_content(&concept_tuple(&concept_type, &name));
        Concept {
            id,
            name,
            concept_type,
            vector,
            inserted_at: now,
            updated_at: now,
        }
    }

    /// String form "(type,name)" used for content-derived ids and for
    /// embedding the concept itself.
    pub fn tuple(&self) -> String {
        concept_tuple(&self.concept_type, &self.name)
    }
}

/// Canonical tuple representation shared by every site that derives a
/// concept id.
pub fn concept_tuple(concept_type: &str, name: &str) -> String {
    format!("({concept_type},{name})")
}

/// A reference from a chat record to a concept, with the importance the
/// extractor assigned in that record's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRef {
    pub concept_id: Id,
    /// Importance score from 1 to 10.
    pub importance: u8,
}

/// How far an enrichment processor has advanced, persisted for recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Processor identifier (e.g. "embedding", "concept").
    pub processor_type: String,
    /// Highest successfully processed record id.
    pub last_id: Id,
    /// When the checkpoint was last saved.
    pub updated_at: DateTime<Utc>,
}

/// A search hit: the full record plus its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub record: ChatRecord,
    pub score: f32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_content_deterministic() {
        let a = Id::from_content("(person,alice)");
        let b = Id::from_content("(person,alice)");
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_id_from_content_distinguishes_tuples() {
        // Same characters, different split between type and name.
        let a = Id::from_content("(place,paris)");
        let b = Id::from_content("(placep,aris)");
        assert_ne!(a, b);
    }

    #[test]
    fn test_speaker_wire_round_trip() {
        assert_eq!(Speaker::from_wire(Speaker::Human.wire()), Some(Speaker::Human));
        assert_eq!(Speaker::from_wire(Speaker::Ai.wire()), Some(Speaker::Ai));
        assert_eq!(Speaker::from_wire(0), None);
        assert_eq!(Speaker::from_wire(3), None);
    }

    #[test]
    fn test_concept_tuple_format() {
        let concept = Concept::new("eiffel tower", "building", Vec::new(), Utc::now());
        assert_eq!(concept.tuple(), "(building,eiffel tower)");
        assert_eq!(concept.id, Id::from_content("(building,eiffel tower)"));
    }

    #[test]
    fn test_chat_record_new_is_unenriched() {
        let now = Utc::now();
        let record = ChatRecord::new(Speaker::Human, "hello", now);
        assert_eq!(record.id, Id::ZERO);
        assert!(record.concepts.is_empty());
        assert!(record.vector.is_empty());
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_concept_serde_uses_type_field() {
        let concept = Concept::new("dog", "animal", Vec::new(), Utc::now());
        let json = serde_json::to_value(&concept).unwrap();
        assert_eq!(json["type"], "animal");
    }
}

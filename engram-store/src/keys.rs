//! Key schema.
//!
//! All keys are byte strings in one ordered keyspace. Composite keys write
//! integer components big-endian so lexicographic order equals numeric
//! order, which is what makes the date and concept indices range-scannable.
//!
//! | name | format |
//! |---|---|
//! | chat primary | `charec:` + decimal id |
//! | chat date index | `charecd:` + be64(unix micros) + be64(id) |
//! | chat concept index | `charecc:` + be64(concept id) + be64(record id) |
//! | chat id sequence | `charecseq` |
//! | concept primary | `conrec:` + decimal id |
//! | concept tuple index | `contyna:` + type + name |
//! | checkpoint | processor type + `:chkpt` |

use chrono::{DateTime, Utc};
use engram_core::Id;

/// Prefix shared by the chat primary keys and, incidentally, by the chat
/// index namespaces below it. Scans over this prefix must skip the index
/// keys and the sequence key.
pub const CHAT_RECORD_PREFIX: &[u8] = b"charec";
pub const CHAT_DATE_PREFIX: &[u8] = b"charecd:";
pub const CHAT_CONCEPT_PREFIX: &[u8] = b"charecc:";
/// Key of the chat-record id sequence.
pub const CHAT_ID_SEQUENCE: &[u8] = b"charecseq";
pub const CONCEPT_RECORD_PREFIX: &[u8] = b"conrec:";
pub const CONCEPT_TUPLE_PREFIX: &[u8] = b"contyna:";

/// Primary key for a chat record.
pub fn chat_record_key(id: Id) -> Vec<u8> {
    format!("charec:{id}").into_bytes()
}

/// Date-index key: timestamp then id, both big-endian.
pub fn chat_date_key(timestamp: DateTime<Utc>, id: Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(CHAT_DATE_PREFIX.len() + 16);
    key.extend_from_slice(CHAT_DATE_PREFIX);
    key.extend_from_slice(&(timestamp.timestamp_micros() as u64).to_be_bytes());
    key.extend_from_slice(&id.0.to_be_bytes());
    key
}

/// Partial date-index key (timestamp only), for range scans.
pub fn partial_chat_date_key(timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(CHAT_DATE_PREFIX.len() + 8);
    key.extend_from_slice(CHAT_DATE_PREFIX);
    key.extend_from_slice(&(timestamp.timestamp_micros() as u64).to_be_bytes());
    key
}

/// Concept-index key: concept id then record id, both big-endian.
pub fn chat_concept_key(concept_id: Id, record_id: Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(CHAT_CONCEPT_PREFIX.len() + 16);
    key.extend_from_slice(CHAT_CONCEPT_PREFIX);
    key.extend_from_slice(&concept_id.0.to_be_bytes());
    key.extend_from_slice(&record_id.0.to_be_bytes());
    key
}

/// Partial concept-index key (concept id only), for per-concept scans.
pub fn partial_chat_concept_key(concept_id: Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(CHAT_CONCEPT_PREFIX.len() + 8);
    key.extend_from_slice(CHAT_CONCEPT_PREFIX);
    key.extend_from_slice(&concept_id.0.to_be_bytes());
    key
}

/// Primary key for a concept.
pub fn concept_key(id: Id) -> Vec<u8> {
    format!("conrec:{id}").into_bytes()
}

/// Unique (name, type) lookup key. The type comes first so concepts of one
/// type cluster together.
pub fn concept_tuple_key(name: &str, concept_type: &str) -> Vec<u8> {
    let mut key =
        Vec::with_capacity(CONCEPT_TUPLE_PREFIX.len() + concept_type.len() + name.len());
    key.extend_from_slice(CONCEPT_TUPLE_PREFIX);
    key.extend_from_slice(concept_type.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

/// Checkpoint key for a processor type.
pub fn checkpoint_key(processor_type: &str) -> Vec<u8> {
    format!("{processor_type}:chkpt").into_bytes()
}

/// Whether `key` is a chat primary key rather than one of the index or
/// sequence keys sharing the `charec` prefix. The date index (`charecd:`),
/// concept index (`charecc:`) and sequence key (`charecseq`) all diverge at
/// the byte after `charec`, so the primary `charec:` prefix identifies
/// record keys exactly.
pub fn is_chat_record_key(key: &[u8]) -> bool {
    key.starts_with(b"charec:")
}

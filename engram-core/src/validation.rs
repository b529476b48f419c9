//! Domain validation rules.
//!
//! Applied at the add/ingest boundary. Enrichment fields (vector, concepts)
//! are not validated here because they are empty until their processor runs.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::types::{ChatRecord, Concept, ConceptRef};

/// Validate a chat record against domain rules: non-empty contents and a
/// timestamp that is not in the future relative to `now`.
pub fn validate_chat_record(record: &ChatRecord, now: DateTime<Utc>) -> Result<()> {
    if record.contents.is_empty() {
        return Err(Error::validation("chat record contents cannot be empty"));
    }
    if record.timestamp > now {
        return Err(Error::validation(format!(
            "chat record timestamp {} is in the future",
            record.timestamp
        )));
    }
    for concept_ref in &record.concepts {
        validate_concept_ref(concept_ref)?;
    }
    Ok(())
}

/// Validate a concept: non-empty name and type.
pub fn validate_concept(concept: &Concept) -> Result<()> {
    if concept.name.is_empty() {
        return Err(Error::validation("concept name cannot be empty"));
    }
    if concept.concept_type.is_empty() {
        return Err(Error::validation("concept type cannot be empty"));
    }
    Ok(())
}

/// Validate a concept reference: importance must be in 1..=10.
pub fn validate_concept_ref(concept_ref: &ConceptRef) -> Result<()> {
    if !(1..=10).contains(&concept_ref.importance) {
        return Err(Error::validation(format!(
            "concept importance {} outside 1..=10",
            concept_ref.importance
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{Id, Speaker};
    use crate::ErrorKind;
    use chrono::Duration;

    #[test]
    fn test_valid_record_passes() {
        let now = Utc::now();
        let record = ChatRecord::new(Speaker::Human, "hello", now - Duration::seconds(1));
        assert!(validate_chat_record(&record, now).is_ok());
    }

    #[test]
    fn test_empty_contents_rejected() {
        let now = Utc::now();
        let record = ChatRecord::new(Speaker::Ai, "", now);
        let err = validate_chat_record(&record, now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let now = Utc::now();
        let record = ChatRecord::new(Speaker::Human, "hi", now + Duration::minutes(5));
        let err = validate_chat_record(&record, now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_timestamp_exactly_now_allowed() {
        let now = Utc::now();
        let record = ChatRecord::new(Speaker::Human, "hi", now);
        assert!(validate_chat_record(&record, now).is_ok());
    }

    #[test]
    fn test_importance_bounds() {
        for importance in [1u8, 5, 10] {
            assert!(validate_concept_ref(&ConceptRef {
                concept_id: Id(1),
                importance,
            })
            .is_ok());
        }
        for importance in [0u8, 11] {
            assert!(validate_concept_ref(&ConceptRef {
                concept_id: Id(1),
                importance,
            })
            .is_err());
        }
    }

    #[test]
    fn test_concept_requires_name_and_type() {
        let now = Utc::now();
        let mut concept = Concept::new("dog", "animal", Vec::new(), now);
        assert!(validate_concept(&concept).is_ok());

        concept.name.clear();
        assert!(validate_concept(&concept).is_err());

        concept.name = "dog".to_string();
        concept.concept_type.clear();
        assert!(validate_concept(&concept).is_err());
    }
}

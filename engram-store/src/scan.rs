//! Linear vector-similarity scan over chat records.
//!
//! Walks every chat primary key, skipping the index and sequence keys that
//! share the `charec` prefix, and scores each vectorized record against the
//! query by inner product. Embeddings are unit-normalized by convention, so
//! the inner product is cosine similarity. Complexity is linear in the
//! number of records; this scan is the algorithmic bottleneck of search.

use engram_core::{Result, SearchResult};

use crate::backend::Direction;
use crate::chat::ChatStore;
use crate::{codec, keys};

impl ChatStore {
    /// Records whose vector scores at least `min_similarity` against
    /// `query`, sorted by score descending and truncated to `limit`.
    /// Records without a vector are skipped.
    pub fn find_similar(
        &self,
        query: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let mut results = self.backend.with_read(|scope| {
            let mut results = Vec::new();
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
                if record.vector.is_empty() {
                    continue;
                }
                let score = dot_product(query, &record.vector);
                if score >= min_similarity {
                    results.push(SearchResult { record, score });
                }
            }
            Ok(results)
        })?;

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }
}

/// Inner product over the shorter of the two vectors.
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use chrono::Utc;
    use engram_core::{ChatRecord, Speaker};

    fn store_with_vectors(vectors: &[&[f32]]) -> ChatStore {
        let backend = Backend::open("", true).unwrap();
        let store = ChatStore::new(&backend).unwrap();
        let now = Utc::now();
        let added = store
            .add(
                vectors
                    .iter()
                    .enumerate()
                    .map(|(i, _)| ChatRecord::new(Speaker::Human, format!("record {i}"), now))
                    .collect(),
            )
            .unwrap();
        let enriched: Vec<ChatRecord> = added
            .into_iter()
            .zip(vectors)
            .map(|(mut record, vector)| {
                record.vector = vector.to_vec();
                record
            })
            .collect();
        store.update(enriched).unwrap();
        store
    }

    #[test]
    fn test_dot_product_uses_shorter_length() {
        assert_eq!(dot_product(&[1.0, 2.0, 3.0], &[1.0, 1.0]), 3.0);
        assert_eq!(dot_product(&[1.0], &[2.0, 100.0]), 2.0);
    }

    #[test]
    fn test_find_similar_orders_by_score() {
        let store = store_with_vectors(&[
            &[1.0, 0.0],
            &[0.0, 1.0],
            &[0.7071, 0.7071],
        ]);
        let results = store.find_similar(&[1.0, 0.0], 0.1, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!((results[1].score - 0.7071).abs() < 1e-4);
    }

    #[test]
    fn test_find_similar_applies_threshold() {
        let store = store_with_vectors(&[&[1.0, 0.0], &[0.0, 1.0]]);
        let results = store.find_similar(&[1.0, 0.0], 0.5, 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_find_similar_skips_vectorless_records() {
        let backend = Backend::open("", true).unwrap();
        let store = ChatStore::new(&backend).unwrap();
        store
            .add(vec![ChatRecord::new(Speaker::Human, "no vector yet", Utc::now())])
            .unwrap();
        let results = store.find_similar(&[1.0, 0.0], 0.0, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_find_similar_zero_limit() {
        let store = store_with_vectors(&[&[1.0, 0.0]]);
        let results = store.find_similar(&[1.0, 0.0], 0.0, 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_find_similar_truncates_to_limit() {
        let store = store_with_vectors(&[&[1.0, 0.0], &[0.9, 0.1], &[0.8, 0.2]]);
        let results = store.find_similar(&[1.0, 0.0], 0.0, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }
}

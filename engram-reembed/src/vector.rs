//! Vector normalization.

/// Scale a vector to unit length. A zero vector comes back zero (it has no
/// direction to preserve), and an empty vector comes back empty.
pub fn normalize_vector(vector: &[f32]) -> Vec<f32> {
    if vector.is_empty() {
        return Vec::new();
    }

    let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        return vec![0.0; vector.len()];
    }
    vector.iter().map(|v| v / magnitude).collect()
}

//! Vector encoding and similarity.

/// Encode a vector as a blob of little-endian `f32`s.
#[must_use]
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a blob written by [`vec_to_blob`]. Trailing bytes that do not form
/// a whole `f32` are ignored.
#[must_use]
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched or zero
/// vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// `1 - cosine_similarity`: `0.0` for identical direction, up to `2.0`.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_layout_is_little_endian() {
        let blob = vec_to_blob(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(blob_to_vec(&blob), vec![1.0, -2.5]);
        assert_eq!(blob_to_vec(&blob[..7]), vec![1.0]);
    }

    #[test]
    fn distance_orders_by_direction() {
        let q = [1.0, 0.0];
        assert!(cosine_distance(&q, &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&q, &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&q, &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_vectors_have_zero_similarity() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}

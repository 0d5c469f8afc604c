//! Vector similarity

/// Cosine similarity clamped to `[0, 1]`
///
/// Returns `None` for empty vectors, mismatched lengths or zero norms.
/// Opposed vectors score 0 rather than negative.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    if cosine.is_finite() {
        Some(cosine.clamp(0.0, 1.0) as f32)
    } else {
        None
    }
}

//! ============================================================================
//! Similarity Math - In-process cosine scoring for the scan fallback
//! ============================================================================

/// Compute cosine similarity between two vectors.
/// A zero-norm vector (or mismatched lengths) scores 0.0, never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Score candidates against a query, drop those below the threshold, and
/// return the top k sorted descending by similarity.
pub fn top_k_above_threshold<T>(
    query: &[f32],
    candidates: Vec<(Vec<f32>, T)>,
    k: usize,
    threshold: f32,
) -> Vec<(f32, T)> {
    let mut scored: Vec<(f32, T)> = candidates
        .into_iter()
        .filter_map(|(vector, item)| {
            let score = cosine_similarity(query, &vector);
            (score >= threshold).then_some((score, item))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

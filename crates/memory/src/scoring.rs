//! Similarity scoring for hybrid search.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity over embeddings
//! - A substring / word-overlap text score
//! - The weighted hybrid of the two

use std::collections::HashSet;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    dot / denom
}

/// Lowercased alphanumeric words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Text relevance in [0, 1].
///
/// A whole-query substring hit scores 1.0; otherwise the score is the share
/// of distinct query words that occur in the content.
pub fn text_score(query: &str, content: &str) -> f64 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    if content_lower.contains(&query) {
        return 1.0;
    }

    let query_words: HashSet<String> = tokenize(&query).into_iter().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let content_words: HashSet<String> = tokenize(&content_lower).into_iter().collect();
    let hits = query_words.iter().filter(|w| content_words.contains(*w)).count();
    hits as f64 / query_words.len() as f64
}

/// Weights for combining vector and text scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub vector: f64,
    pub text: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

/// `vector_weight * max(cosine, 0) + text_weight * text`.
pub fn hybrid_score(vector_score: f64, text_score: f64, weights: HybridWeights) -> f64 {
    weights.vector * vector_score.max(0.0) + weights.text * text_score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_or_empty() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn substring_scores_full() {
        assert_eq!(text_score("Green Tea", "User prefers green tea in the morning"), 1.0);
    }

    #[test]
    fn word_overlap_scores_partially() {
        let s = text_score("tea coffee", "likes tea a lot");
        assert!((s - 0.5).abs() < 1e-9);
        assert_eq!(text_score("", "anything"), 0.0);
        assert_eq!(text_score("zebra", "likes tea"), 0.0);
    }

    #[test]
    fn hybrid_uses_weights_and_ignores_negative_cosine() {
        let w = HybridWeights::default();
        assert!((hybrid_score(1.0, 1.0, w) - 1.0).abs() < 1e-9);
        assert!((hybrid_score(-0.5, 1.0, w) - 0.3).abs() < 1e-9);
        assert!((hybrid_score(0.5, 0.0, w) - 0.35).abs() < 1e-9);
    }
}

//! Relevance scoring for a (query, document) pair.
//!
//! Two independent signals are combined linearly:
//! - cosine similarity between query and document embeddings
//! - a BM25-style lexical score without inverse document frequency
//!
//! All functions here are pure and never fail.

use std::collections::HashSet;

use crate::config::ScoringConfig;

/// Cosine similarity between two vectors.
///
/// The dot product runs over the common prefix; each magnitude over its full
/// vector. Returns exactly 0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum();
    let magnitude_a = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let magnitude_b = b.iter().map(|y| (*y as f64) * (*y as f64)).sum::<f64>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot / (magnitude_a * magnitude_b)
}

/// Lower-cased, whitespace-split, de-duplicated query terms (first occurrence order)
pub fn query_terms(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut seen = HashSet::new();
    let terms: Vec<String> = lowered
        .split_whitespace()
        .filter(|term| seen.insert(*term))
        .map(str::to_string)
        .collect();
    terms
}

/// BM25-like lexical relevance of `content` for the given query terms.
///
/// A term contributes only if it appears as a whole token of the document;
/// its frequency is then the number of non-overlapping occurrences in the
/// lower-cased content. Document length is the number of distinct tokens.
/// `avg_doc_len` defaults to the document's own length, which makes the
/// length normalization factor exactly 1.
pub fn lexical_score(
    terms: &[String],
    content: &str,
    avg_doc_len: Option<f64>,
    config: &ScoringConfig,
) -> f64 {
    if terms.is_empty() || content.is_empty() {
        return 0.0;
    }

    let lowered = content.to_lowercase();
    let doc_terms: HashSet<&str> = lowered.split_whitespace().collect();
    let doc_len = doc_terms.len() as f64;
    let avg_doc_len = avg_doc_len.unwrap_or(doc_len);
    if doc_len == 0.0 || avg_doc_len <= 0.0 {
        return 0.0;
    }

    let norm = 1.0 - config.b + config.b * (doc_len / avg_doc_len);

    terms
        .iter()
        .filter(|term| doc_terms.contains(term.as_str()))
        .map(|term| {
            let tf = lowered.matches(term.as_str()).count() as f64;
            tf * (config.k1 + 1.0) / (tf + config.k1 * norm)
        })
        .sum()
}

/// Per-document score breakdown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridScore {
    pub vector: f64,
    pub lexical: f64,
    pub combined: f64,
}

/// Weighted sum of the two signals
pub fn combine(vector: f64, lexical: f64, config: &ScoringConfig) -> f64 {
    config.vector_weight * vector + config.lexical_weight * lexical
}

/// Score one document against a prepared query
pub fn score_document(
    query_embedding: &[f32],
    terms: &[String],
    doc_embedding: &[f32],
    content: &str,
    config: &ScoringConfig,
) -> HybridScore {
    let vector = cosine_similarity(query_embedding, doc_embedding);
    let lexical = lexical_score(terms, content, None, config);
    HybridScore {
        vector,
        lexical,
        combined: combine(vector, lexical, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(q: &str) -> Vec<String> {
        query_terms(q)
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_zero_magnitude_is_zero() {
        let zero = vec![0.0f32; 4];
        for other in [vec![1.0, 2.0, 3.0, 4.0], vec![0.0; 4], vec![-5.0, 0.0, 0.0, 1.0]] {
            assert_eq!(cosine_similarity(&zero, &other), 0.0);
            assert_eq!(cosine_similarity(&other, &zero), 0.0);
        }
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_query_terms_lowercase_and_dedup() {
        assert_eq!(
            terms("Insider  TRADING insider\ttrading"),
            vec!["insider".to_string(), "trading".to_string()]
        );
        assert!(terms("   ").is_empty());
    }

    #[test]
    fn test_lexical_single_match_with_default_normalization() {
        let config = ScoringConfig::default();
        // tf=1, norm=1: 1 * 2.5 / (1 + 1.5) = 1.0
        let score = lexical_score(&terms("insider"), "insider trading violation", None, &config);
        assert!((score - 1.0).abs() < 1e-12);

        let both = lexical_score(
            &terms("insider trading"),
            "insider trading violation",
            None,
            &config,
        );
        assert!((both - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_lexical_counts_substring_occurrences_of_matched_terms() {
        let config = ScoringConfig::default();
        // "trade" is a whole token, and also occurs inside "trades": tf = 2
        let score = lexical_score(&terms("trade"), "trade trades", None, &config);
        let expected = 2.0 * 2.5 / (2.0 + 1.5);
        assert!((score - expected).abs() < 1e-12);

        // Substring-only presence does not count as a match
        assert_eq!(lexical_score(&terms("trad"), "trade trades", None, &config), 0.0);
    }

    #[test]
    fn test_lexical_uses_external_average_length() {
        let config = ScoringConfig::default();
        // doc_len = 2 distinct terms, avg = 4 -> norm = 0.25 + 0.75 * 0.5 = 0.625
        let score = lexical_score(&terms("aml"), "aml breach", Some(4.0), &config);
        let expected = 2.5 / (1.0 + 1.5 * 0.625);
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_lexical_empty_inputs() {
        let config = ScoringConfig::default();
        assert_eq!(lexical_score(&[], "anything", None, &config), 0.0);
        assert_eq!(lexical_score(&terms("aml"), "", None, &config), 0.0);
        assert_eq!(lexical_score(&terms("aml"), "   ", None, &config), 0.0);
    }

    #[test]
    fn test_combined_uses_fixed_weights() {
        let config = ScoringConfig::default();
        let score = score_document(
            &[1.0, 0.0],
            &terms("insider trading"),
            &[1.0, 0.0],
            "insider trading violation",
            &config,
        );
        assert_eq!(score.vector, 1.0);
        assert_eq!(score.combined, 0.7 * score.vector + 0.3 * score.lexical);
    }

    #[test]
    fn test_alternate_weights() {
        let config = ScoringConfig {
            vector_weight: 0.0,
            lexical_weight: 1.0,
            ..ScoringConfig::default()
        };
        assert_eq!(combine(0.9, 0.25, &config), 0.25);
    }
}

/// Pure text similarity function, consumed optionally by the Relevance
/// Scorer's `query_similarity` term and by the `semantic` pruning strategy.
/// Must not mutate anything it's given (spec §6).
///
/// Shaped after the teacher's `EmbeddingProvider` (`memory::embedding`): a
/// small, optional, pluggable trait with a sensible "not configured" default.
pub trait SimilarityFn: Send + Sync {
    fn similarity(&self, query: &str, entry_content_or_summary: &str) -> f64;
}

/// Default when no similarity function is configured: always 0, which makes
/// `w_query` a no-op in the scorer's weighted sum (spec §4.D).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSimilarity;

impl SimilarityFn for NoopSimilarity {
    fn similarity(&self, _query: &str, _entry_content_or_summary: &str) -> f64 {
        0.0
    }
}

/// Crude token-overlap similarity (Jaccard over lowercased whitespace
/// tokens). Not semantic, but deterministic and dependency-free — useful for
/// tests and as a placeholder ahead of wiring in a real embedding-based
/// similarity function.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaccardSimilarity;

impl SimilarityFn for JaccardSimilarity {
    fn similarity(&self, query: &str, entry_content_or_summary: &str) -> f64 {
        use std::collections::HashSet;

        let lower_query = query.to_lowercase();
        let lower_content = entry_content_or_summary.to_lowercase();
        let q: HashSet<&str> = lower_query.split_whitespace().collect();
        let c: HashSet<&str> = lower_content.split_whitespace().collect();
        if q.is_empty() || c.is_empty() {
            return 0.0;
        }
        let intersection = q.intersection(&c).count();
        let union = q.union(&c).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_always_zero() {
        assert_eq!(NoopSimilarity.similarity("anything", "anything"), 0.0);
    }

    #[test]
    fn jaccard_identical_is_one() {
        let s = JaccardSimilarity.similarity("fix the bug", "fix the bug");
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_disjoint_is_zero() {
        let s = JaccardSimilarity.similarity("apples oranges", "trains planes");
        assert_eq!(s, 0.0);
    }

    #[test]
    fn jaccard_is_case_insensitive() {
        let s = JaccardSimilarity.similarity("Fix The Bug", "fix the bug");
        assert!((s - 1.0).abs() < 1e-9);
    }
}

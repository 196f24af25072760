use crate::config::EngineConfig;
use crate::entry::{Entry, EntryId, Tier};
use crate::similarity::SimilarityFn;

/// Transient input to the scorer (spec §3 `ScoringContext`). Built fresh by
/// the facade for each hook invocation; never stored on the entry.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub current_query: Option<String>,
    pub active_files: Vec<String>,
    pub active_tools: Vec<String>,
    pub session_id: Option<String>,
    pub timestamp: i64,
    pub recent_entry_ids: Vec<EntryId>,
}

/// Fixed weights for the relevance formula (spec §4.D). Sum to 1.0 before
/// the tier-decay subtraction, matching "weights MUST sum to ≤ 1".
const W_RECENCY: f64 = 0.25;
const W_TYPE: f64 = 0.2;
const W_ACCESS: f64 = 0.15;
const W_FILE: f64 = 0.15;
const W_TOOL: f64 = 0.1;
const W_QUERY: f64 = 0.15;

fn recency(entry: &Entry, now_ms: i64, tau_ms: f64) -> f64 {
    if tau_ms <= 0.0 {
        return 0.0;
    }
    let idle = entry.idle_ms(now_ms) as f64;
    (-idle / tau_ms).exp()
}

/// Diminishing-returns mapping from raw access count to [0,1), matching the
/// teacher's `access_count.max(1)` multiplicative weighting in
/// `memory::scoring::decay_score` but reshaped into a bounded additive term
/// since this scorer sums weighted signals rather than multiplying them.
fn access_factor(access_count: u32) -> f64 {
    1.0 - (1.0 / (1.0 + access_count as f64))
}

/// Per-tier relevance decay, scaled by `decay_rate`. Hot entries are never
/// decayed; deeper tiers are penalized progressively, reflecting that their
/// content is increasingly lossy or stale.
fn tier_decay(tier: Tier, decay_rate: f64) -> f64 {
    let step = match tier {
        Tier::Hot => 0.0,
        Tier::Warm => 1.0,
        Tier::Cold => 2.0,
        Tier::Archived => 3.0,
    };
    (decay_rate * step).min(1.0)
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Similarity of `entry`'s content (or its compressed summary, if demoted)
/// to `context.current_query`, via the configured `SimilarityFn`. Shared by
/// the scorer's `w_query` term and the pruning controller's `semantic`
/// strategy so both read the same signal (spec §4.D, §4.E).
pub(crate) fn query_similarity(
    entry: &Entry,
    context: &ScoringContext,
    similarity: &dyn SimilarityFn,
) -> f64 {
    match &context.current_query {
        Some(q) if !q.is_empty() => {
            let haystack = entry
                .compressed
                .as_ref()
                .and_then(|c| c.summary.as_deref())
                .unwrap_or(&entry.content);
            similarity.similarity(q, haystack)
        }
        _ => 0.0,
    }
}

/// Compute `score(entry, context) -> [0,1]` (spec §4.D). Never fails;
/// missing signals simply contribute 0.
pub fn score(
    entry: &Entry,
    context: &ScoringContext,
    config: &EngineConfig,
    similarity: &dyn SimilarityFn,
) -> f64 {
    let tau_ms = config.tiers.hot.max_age_ms.max(1) as f64;

    let file_match = entry
        .metadata
        .file_path
        .as_deref()
        .map(|p| context.active_files.iter().any(|f| f == p))
        .unwrap_or(false);

    let tool_match = entry
        .metadata
        .tool_name
        .as_deref()
        .map(|t| context.active_tools.iter().any(|a| a == t))
        .unwrap_or(false);

    let base = W_RECENCY * recency(entry, context.timestamp, tau_ms)
        + W_TYPE * entry.entry_type.type_prior()
        + W_ACCESS * access_factor(entry.access_count)
        + W_FILE * if file_match { 1.0 } else { 0.0 }
        + W_TOOL * if tool_match { 1.0 } else { 0.0 }
        + W_QUERY * query_similarity(entry, context, similarity);

    clamp01(base - tier_decay(entry.tier, config.decay_rate))
}

/// Score every entry in `entries` under `context`, writing `relevance` on
/// each and returning `(id, score)` pairs sorted descending (spec §4.D).
/// Ties broken by id for determinism.
pub fn score_all<'a>(
    entries: impl Iterator<Item = &'a mut Entry>,
    context: &ScoringContext,
    config: &EngineConfig,
    similarity: &dyn SimilarityFn,
) -> Vec<(EntryId, f64)> {
    let mut scored: Vec<(EntryId, f64)> = entries
        .map(|entry| {
            let s = score(entry, context, config, similarity);
            entry.relevance = s;
            (entry.id.clone(), s)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryType, Metadata};
    use crate::similarity::{JaccardSimilarity, NoopSimilarity};

    fn entry(entry_type: EntryType, last_accessed_at: i64, access_count: u32) -> Entry {
        Entry {
            id: EntryId::generate("test", 0),
            content: "fix the login bug".into(),
            entry_type,
            tokens: 10,
            tier: Tier::Hot,
            created_at: 0,
            last_accessed_at,
            access_count,
            relevance: 0.5,
            metadata: Metadata::default(),
            compressed: None,
        }
    }

    #[test]
    fn score_is_within_bounds() {
        let config = EngineConfig::default();
        let context = ScoringContext {
            timestamp: 10_000,
            ..Default::default()
        };
        let e = entry(EntryType::ToolResult, 0, 100);
        let s = score(&e, &context, &config, &NoopSimilarity);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn system_prompt_scores_higher_than_other_all_else_equal() {
        let config = EngineConfig::default();
        let context = ScoringContext {
            timestamp: 0,
            ..Default::default()
        };
        let sys = entry(EntryType::SystemPrompt, 0, 0);
        let other = entry(EntryType::Other, 0, 0);
        let s_sys = score(&sys, &context, &config, &NoopSimilarity);
        let s_other = score(&other, &context, &config, &NoopSimilarity);
        assert!(s_sys > s_other);
    }

    #[test]
    fn deeper_tiers_score_lower_all_else_equal() {
        let config = EngineConfig::default();
        let context = ScoringContext {
            timestamp: 0,
            ..Default::default()
        };
        let mut cold = entry(EntryType::FileRead, 0, 5);
        cold.tier = Tier::Cold;
        let mut hot = entry(EntryType::FileRead, 0, 5);
        hot.tier = Tier::Hot;
        let s_cold = score(&cold, &context, &config, &NoopSimilarity);
        let s_hot = score(&hot, &context, &config, &NoopSimilarity);
        assert!(s_cold < s_hot);
    }

    #[test]
    fn active_file_match_increases_score() {
        let config = EngineConfig::default();
        let mut e = entry(EntryType::FileRead, 0, 1);
        e.metadata.file_path = Some("src/main.rs".into());
        let context_no_match = ScoringContext {
            timestamp: 0,
            active_files: vec!["other.rs".into()],
            ..Default::default()
        };
        let context_match = ScoringContext {
            timestamp: 0,
            active_files: vec!["src/main.rs".into()],
            ..Default::default()
        };
        let without = score(&e, &context_no_match, &config, &NoopSimilarity);
        let with = score(&e, &context_match, &config, &NoopSimilarity);
        assert!(with > without);
    }

    #[test]
    fn query_similarity_contributes_when_configured() {
        let config = EngineConfig::default();
        let e = entry(EntryType::AssistantMessage, 0, 1);
        let context = ScoringContext {
            timestamp: 0,
            current_query: Some("fix the login bug".into()),
            ..Default::default()
        };
        let with_jaccard = score(&e, &context, &config, &JaccardSimilarity);
        let with_noop = score(&e, &context, &config, &NoopSimilarity);
        assert!(with_jaccard > with_noop);
    }

    #[test]
    fn score_all_sorts_descending_and_writes_relevance() {
        let config = EngineConfig::default();
        let context = ScoringContext {
            timestamp: 0,
            ..Default::default()
        };
        let mut low = entry(EntryType::Other, 0, 0);
        low.id = EntryId("low".into());
        let mut high = entry(EntryType::SystemPrompt, 0, 100);
        high.id = EntryId("high".into());
        let mut entries = vec![low, high];

        let results = score_all(entries.iter_mut(), &context, &config, &NoopSimilarity);
        assert_eq!(results[0].0, EntryId("high".into()));
        assert!(results[0].1 >= results[1].1);
        assert!(entries.iter().all(|e| e.relevance > 0.0));
    }

    #[test]
    fn never_fails_on_empty_query() {
        let config = EngineConfig::default();
        let context = ScoringContext {
            timestamp: 0,
            current_query: Some(String::new()),
            ..Default::default()
        };
        let e = entry(EntryType::Other, 0, 0);
        let s = score(&e, &context, &config, &NoopSimilarity);
        assert!((0.0..=1.0).contains(&s));
    }
}

use tracing::debug;

use crate::compression::compress;
use crate::config::{EngineConfig, TierConfig};
use crate::entry::Tier;
use crate::store::EntryStore;
use crate::vector_store::VectorStore;

/// Result of a `transition_tiers()` batch pass (spec §4.C).
#[derive(Debug, Clone, Default)]
pub struct TransitionResult {
    pub promoted: usize,
    pub hot_to_warm: usize,
    pub warm_to_cold: usize,
    pub cold_to_archived: usize,
    pub tokens_saved: u64,
}

/// Compute the target tier for an entry given its age/idle time (spec
/// §4.C "Tier assignment"). `archived` is never reached here; it is only
/// assigned by the pruning controller under emergency pressure.
pub fn target_tier(age_ms: i64, idle_ms: i64, config: &EngineConfig) -> Tier {
    if config.promote_on_access && idle_ms < config.tiers.hot.max_age_ms {
        return Tier::Hot;
    }
    if age_ms < config.tiers.hot.max_age_ms {
        Tier::Hot
    } else if age_ms < config.tiers.warm.max_age_ms {
        Tier::Warm
    } else {
        Tier::Cold
    }
}

fn tier_config(tier: Tier, config: &EngineConfig) -> Option<TierConfig> {
    match tier {
        Tier::Hot => Some(config.tiers.hot),
        Tier::Warm => Some(config.tiers.warm),
        Tier::Cold => Some(config.tiers.cold),
        Tier::Archived => None,
    }
}

/// Batch pass over every entry in `store`, demoting/promoting tiers and
/// invoking the compressor on demotions away from `hot` whose target tier
/// compresses (spec §4.C "Transitions"). Runs to completion without
/// suspension.
pub fn transition_tiers(
    store: &mut EntryStore,
    config: &EngineConfig,
    vector_store: &dyn VectorStore,
    now_ms: i64,
) -> TransitionResult {
    let mut result = TransitionResult::default();

    let ids: Vec<_> = store.iter().map(|e| e.id.clone()).collect();
    for id in ids {
        let (current_tier, target, tokens_before) = {
            let Some(entry) = store.get(&id) else { continue };
            let age = entry.age_ms(now_ms);
            let idle = entry.idle_ms(now_ms);
            (entry.tier, target_tier(age, idle, config), entry.effective_tokens())
        };

        if target == current_tier {
            continue;
        }

        let demotion = target > current_tier;
        let compressed_state = if demotion {
            tier_config(target, config).and_then(|tc| {
                if tc.compression_ratio < 1.0 {
                    let entry = store.get(&id)?;
                    let target_tokens = (entry.tokens as f64 * tc.compression_ratio).ceil() as u32;
                    compress(entry, target_tokens, config.compression_strategy, vector_store, now_ms)
                } else {
                    None
                }
            })
        } else {
            None
        };

        if demotion && compressed_state.is_none() {
            debug!(id = %id, from = ?current_tier, to = ?target, "compression skipped, keeping original content");
        }

        let keep_compressed = if demotion {
            compressed_state
        } else {
            None // promotions always restore full content
        };

        store.update_tier(&id, target, keep_compressed);

        let tokens_after = store.get(&id).map(|e| e.effective_tokens()).unwrap_or(tokens_before);
        if demotion {
            result.tokens_saved += tokens_before.saturating_sub(tokens_after) as u64;
            match target {
                Tier::Warm => result.hot_to_warm += 1,
                Tier::Cold => result.warm_to_cold += 1,
                Tier::Archived => result.cold_to_archived += 1,
                Tier::Hot => {}
            }
        } else {
            result.promoted += 1;
        }
    }

    result
}

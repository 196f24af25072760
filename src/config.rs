use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;

/// Pruning candidate-ordering policy (spec §3 `strategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Fifo,
    Lru,
    Relevance,
    Semantic,
    Adaptive,
}

/// Compression method selected when a tier's `compression_ratio < 1.0`
/// (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    Summary,
    Embedding,
    Hybrid,
}

/// Per-tier age and compression settings (spec §3 Configuration, Tiers).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    pub max_age_ms: i64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    pub hot: TierConfig,
    pub warm: TierConfig,
    pub cold: TierConfig,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            hot: TierConfig {
                max_age_ms: 5 * 60_000,
                compression_ratio: 1.0,
            },
            warm: TierConfig {
                max_age_ms: 60 * 60_000,
                compression_ratio: 0.4,
            },
            cold: TierConfig {
                max_age_ms: 24 * 60 * 60_000,
                compression_ratio: 0.15,
            },
        }
    }
}

/// Implicit compression ratio for the `archived` tier, reached only under
/// emergency pressure, never by age alone (spec §3).
pub const ARCHIVED_COMPRESSION_RATIO: f64 = 0.03;

/// Static configuration bound at construction (spec §3 Configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub context_window_size: u32,
    pub target_utilization: f64,

    pub soft_threshold: f64,
    pub hard_threshold: f64,
    pub emergency_threshold: f64,
    pub min_relevance: f64,
    pub preserve_recent_count: usize,
    pub preserve_patterns: Vec<String>,

    pub strategy: Strategy,
    pub tiers: TierSettings,
    pub compression_strategy: CompressionStrategy,

    pub promote_on_access: bool,
    pub decay_rate: f64,
    pub session_isolation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window_size: 200_000,
            target_utilization: 0.6,
            soft_threshold: 0.5,
            hard_threshold: 0.7,
            emergency_threshold: 0.85,
            min_relevance: 0.3,
            preserve_recent_count: 5,
            preserve_patterns: Vec::new(),
            strategy: Strategy::Relevance,
            tiers: TierSettings::default(),
            compression_strategy: CompressionStrategy::Summary,
            promote_on_access: true,
            decay_rate: 0.05,
            session_isolation: false,
        }
    }
}

impl EngineConfig {
    /// Validate invariants that would make the engine misbehave outright.
    /// Called at construction time only — never after (spec §7:
    /// `InvalidConfig` is construction-time only).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_window_size == 0 {
            return Err(ConfigError::Invalid("context_window_size must be > 0".into()));
        }
        if !(self.soft_threshold < self.hard_threshold && self.hard_threshold < self.emergency_threshold)
        {
            return Err(ConfigError::Invalid(
                "thresholds must satisfy soft < hard < emergency".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.target_utilization) {
            return Err(ConfigError::Invalid("target_utilization must be in (0,1]".into()));
        }
        Ok(())
    }

    /// Merge a duck-typed key-value map (spec §6 "Config source") over the
    /// defaults. Unknown keys are logged and ignored; out-of-range numeric
    /// values are clamped and logged — never hard failures, per spec §9's
    /// "Duck-typed configuration" Design Note. Construction-time validation
    /// (`validate`) still runs afterward and can reject the result outright.
    pub fn merge_with_defaults(partial: &Value) -> Self {
        let mut config = Self::default();

        let Value::Object(map) = partial else {
            if !partial.is_null() {
                warn!("config source is not a JSON object; using defaults");
            }
            return config;
        };

        for (key, value) in map {
            match key.as_str() {
                "context_window_size" => {
                    if let Some(n) = value.as_u64() {
                        config.context_window_size = n as u32;
                    } else {
                        warn!(key, "expected integer, ignoring");
                    }
                }
                "target_utilization" => set_clamped(&mut config.target_utilization, value, 0.0, 1.0, key),
                "soft_threshold" => set_clamped(&mut config.soft_threshold, value, 0.0, 1.0, key),
                "hard_threshold" => set_clamped(&mut config.hard_threshold, value, 0.0, 1.0, key),
                "emergency_threshold" => set_clamped(&mut config.emergency_threshold, value, 0.0, 1.0, key),
                "min_relevance" => set_clamped(&mut config.min_relevance, value, 0.0, 1.0, key),
                "preserve_recent_count" => {
                    if let Some(n) = value.as_u64() {
                        config.preserve_recent_count = n as usize;
                    } else {
                        warn!(key, "expected integer, ignoring");
                    }
                }
                "preserve_patterns" => {
                    if let Some(arr) = value.as_array() {
                        config.preserve_patterns = arr
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect();
                    } else {
                        warn!(key, "expected array of strings, ignoring");
                    }
                }
                "strategy" => match value.as_str().and_then(parse_strategy) {
                    Some(s) => config.strategy = s,
                    None => warn!(key, value = %value, "unrecognized value, keeping default"),
                },
                "compression_strategy" => match value.as_str().and_then(parse_compression_strategy) {
                    Some(s) => config.compression_strategy = s,
                    None => warn!(key, value = %value, "unrecognized value, keeping default"),
                },
                "promote_on_access" => {
                    if let Some(b) = value.as_bool() {
                        config.promote_on_access = b;
                    } else {
                        warn!(key, "expected boolean, ignoring");
                    }
                }
                "session_isolation" => {
                    if let Some(b) = value.as_bool() {
                        config.session_isolation = b;
                    } else {
                        warn!(key, "expected boolean, ignoring");
                    }
                }
                "decay_rate" => set_clamped(&mut config.decay_rate, value, 0.0, 0.999, key),
                "tiers" => {
                    if let Some(obj) = value.as_object() {
                        merge_tiers(&mut config.tiers, obj);
                    } else {
                        warn!(key, "expected object, ignoring");
                    }
                }
                unknown => {
                    warn!(key = unknown, "unknown config key, ignoring");
                }
            }
        }

        config
    }
}

fn set_clamped(field: &mut f64, value: &Value, min: f64, max: f64, key: &str) {
    match value.as_f64() {
        Some(n) => {
            let clamped = n.clamp(min, max);
            if (clamped - n).abs() > f64::EPSILON {
                warn!(key, value = n, clamped, "value out of range, clamped");
            }
            *field = clamped;
        }
        None => warn!(key, "expected number, ignoring"),
    }
}

fn merge_tiers(tiers: &mut TierSettings, obj: &serde_json::Map<String, Value>) {
    for (tier_name, tier_value) in obj {
        let target = match tier_name.as_str() {
            "hot" => &mut tiers.hot,
            "warm" => &mut tiers.warm,
            "cold" => &mut tiers.cold,
            other => {
                warn!(tier = other, "unknown tier name, ignoring");
                continue;
            }
        };
        if let Some(max_age) = tier_value.get("max_age_ms").and_then(Value::as_i64) {
            target.max_age_ms = max_age.max(0);
        }
        if let Some(ratio) = tier_value.get("compression_ratio").and_then(Value::as_f64) {
            target.compression_ratio = ratio.clamp(0.0, 1.0);
        }
    }
}

fn parse_strategy(s: &str) -> Option<Strategy> {
    Some(match s {
        "fifo" => Strategy::Fifo,
        "lru" => Strategy::Lru,
        "relevance" => Strategy::Relevance,
        "semantic" => Strategy::Semantic,
        "adaptive" => Strategy::Adaptive,
        _ => return None,
    })
}

fn parse_compression_strategy(s: &str) -> Option<CompressionStrategy> {
    Some(match s {
        "summary" => CompressionStrategy::Summary,
        "embedding" => CompressionStrategy::Embedding,
        "hybrid" => CompressionStrategy::Hybrid,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = EngineConfig::default();
        config.hard_threshold = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_overrides_known_keys() {
        let partial = json!({ "context_window_size": 50_000, "strategy": "lru" });
        let config = EngineConfig::merge_with_defaults(&partial);
        assert_eq!(config.context_window_size, 50_000);
        assert_eq!(config.strategy, Strategy::Lru);
    }

    #[test]
    fn merge_clamps_out_of_range_threshold() {
        let partial = json!({ "soft_threshold": 5.0 });
        let config = EngineConfig::merge_with_defaults(&partial);
        assert_eq!(config.soft_threshold, 1.0);
    }

    #[test]
    fn merge_ignores_unknown_keys() {
        let partial = json!({ "totally_made_up": 123 });
        let config = EngineConfig::merge_with_defaults(&partial);
        assert_eq!(config.context_window_size, EngineConfig::default().context_window_size);
    }

    #[test]
    fn missing_config_yields_defaults() {
        let config = EngineConfig::merge_with_defaults(&Value::Null);
        assert_eq!(config.target_utilization, EngineConfig::default().target_utilization);
    }

    #[test]
    fn merge_updates_tier_settings() {
        let partial = json!({ "tiers": { "hot": { "max_age_ms": 1000 } } });
        let config = EngineConfig::merge_with_defaults(&partial);
        assert_eq!(config.tiers.hot.max_age_ms, 1000);
        assert_eq!(config.tiers.warm.max_age_ms, TierSettings::default().warm.max_age_ms);
    }
}

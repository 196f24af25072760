use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SnapshotError;
use crate::store::EntryStore;

/// Format tag bumped whenever the snapshot schema changes. A mismatch at
/// `restore` is a hard failure (spec §7), never a silent best-effort load.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub adds: u64,
    pub accesses: u64,
    pub prunes_by_level: HashMap<String, u64>,
    pub compactions_prevented: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gauges {
    pub utilization: f64,
    pub entries_total: usize,
    pub tokens_total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Histogram {
    samples: Vec<f64>,
}

impl Histogram {
    pub fn record(&mut self, value_ms: f64) {
        self.samples.push(value_ms);
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn p99(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64 - 1.0) * 0.99).round() as usize;
        sorted[idx]
    }
}

/// Running counters, gauges, and latency histograms for one engine instance
/// (spec §4.F). Snapshots carry counters and the entry store; histograms
/// are observational and reset on restore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: Counters,
    pub gauges: Gauges,
}

#[derive(Debug, Default)]
pub struct Metrics {
    pub counters: Counters,
    pub gauges: Gauges,
    pub scoring_latency_ms: Histogram,
    pub pruning_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&mut self) {
        self.counters.adds += 1;
    }

    pub fn record_access(&mut self) {
        self.counters.accesses += 1;
    }

    pub fn record_prune(&mut self, level_name: &str) {
        *self.counters.prunes_by_level.entry(level_name.to_string()).or_insert(0) += 1;
    }

    pub fn record_compaction_prevented(&mut self) {
        self.counters.compactions_prevented += 1;
    }

    pub fn refresh_gauges(&mut self, store: &EntryStore, context_window_size: u32) {
        self.gauges.entries_total = store.len();
        self.gauges.tokens_total = store.total_effective_tokens();
        self.gauges.utilization = self.gauges.tokens_total as f64 / context_window_size.max(1) as f64;
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
        }
    }
}

/// Opaque, versioned blob produced by `save_snapshot` (spec §4.F). The
/// engine fingerprints the config that produced it so a restore under an
/// incompatible config is caught early rather than silently misbehaving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    format_version: u32,
    config_fingerprint: u64,
    /// Human-readable capture time, diagnostic only — restore logic never
    /// depends on it, all gating is done via `format_version`/fingerprint.
    taken_at: chrono::DateTime<chrono::Utc>,
    metrics: MetricsSnapshot,
    entries: Vec<crate::entry::Entry>,
}

pub fn config_fingerprint(config: &crate::config::EngineConfig) -> u64 {
    use std::hash::{Hash, Hasher};
    let serialized = serde_json::to_string(config).unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

/// Serialize `store` and `metrics` into an opaque blob (spec §4.F
/// `save_snapshot`). Atomic from the caller's view: this is a pure read of
/// a consistent in-memory state, never partially observed.
pub fn save_snapshot(
    store: &EntryStore,
    metrics: &Metrics,
    config: &crate::config::EngineConfig,
) -> Value {
    let snapshot = Snapshot {
        format_version: SNAPSHOT_FORMAT_VERSION,
        config_fingerprint: config_fingerprint(config),
        taken_at: chrono::Utc::now(),
        metrics: metrics.snapshot(),
        entries: store.iter().cloned().collect(),
    };
    serde_json::to_value(snapshot).unwrap_or(Value::Null)
}

/// Reconstruct store and metrics from a blob produced by `save_snapshot`.
/// Rejects a version or config mismatch outright (spec §7) rather than
/// attempting a best-effort partial load — restores are all-or-nothing.
pub fn restore(
    blob: &Value,
    config: &crate::config::EngineConfig,
) -> Result<(EntryStore, Metrics), SnapshotError> {
    let snapshot: Snapshot =
        serde_json::from_value(blob.clone()).map_err(|e| SnapshotError::Malformed(e.to_string()))?;

    if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            expected: SNAPSHOT_FORMAT_VERSION,
            found: snapshot.format_version,
        });
    }

    let expected_fingerprint = config_fingerprint(config);
    if snapshot.config_fingerprint != expected_fingerprint {
        return Err(SnapshotError::Malformed(
            "snapshot was taken under a different configuration".into(),
        ));
    }

    let mut store = EntryStore::new();
    for entry in snapshot.entries {
        store.insert(entry);
    }

    let mut metrics = Metrics::new();
    metrics.counters = snapshot.metrics.counters;
    metrics.gauges = snapshot.metrics.gauges;

    Ok((store, metrics))
}

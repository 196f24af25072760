use serde_json::Value;
use tracing::info;

use crate::advisor::{AdvisorPlugin, NoAdvisor};
use crate::clock::{Clock, SystemClock};
use crate::compression::compress;
use crate::config::EngineConfig;
use crate::entry::{Entry, EntryId, EntryType, Metadata, Tier};
use crate::error::{ConfigError, EngineError, SnapshotError};
use crate::estimator::{HeuristicEstimator, TokenEstimator};
use crate::metrics::{self, Metrics};
use crate::pruning::{PressureLevel, PruneResult, PruningController};
use crate::scoring::{self, ScoringContext};
use crate::similarity::{NoopSimilarity, SimilarityFn};
use crate::store::EntryStore;
use crate::tiering::{self, TransitionResult};
use crate::vector_store::{NullVectorStore, VectorStore};

/// The Hook Facade (spec §4.G): the sole public entry point, wiring the
/// store, estimator, scorer, pruning controller, metrics, advisor, and
/// similarity/vector-store collaborators into one owned handle. Every
/// method is synchronous and runs to completion before returning, matching
/// the single-threaded-cooperative model (spec §5).
pub struct Engine {
    config: EngineConfig,
    store: EntryStore,
    metrics: Metrics,
    pruning: PruningController,
    clock: Box<dyn Clock>,
    estimator: Box<dyn TokenEstimator>,
    similarity: Box<dyn SimilarityFn>,
    vector_store: Box<dyn VectorStore>,
    advisor: Box<dyn AdvisorPlugin>,
}

/// Construction-time collaborators; all optional, each falling back to a
/// deterministic default so the engine is fully usable with zero external
/// wiring (spec §4.H).
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    clock: Option<Box<dyn Clock>>,
    estimator: Option<Box<dyn TokenEstimator>>,
    similarity: Option<Box<dyn SimilarityFn>>,
    vector_store: Option<Box<dyn VectorStore>>,
    advisor: Option<Box<dyn AdvisorPlugin>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Merge a duck-typed JSON config source over the defaults (spec §6
    /// "Config source").
    pub fn with_config_source(mut self, source: &Value) -> Self {
        self.config = Some(EngineConfig::merge_with_defaults(source));
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn with_similarity(mut self, similarity: Box<dyn SimilarityFn>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn with_vector_store(mut self, vector_store: Box<dyn VectorStore>) -> Self {
        self.vector_store = Some(vector_store);
        self
    }

    pub fn with_advisor(mut self, advisor: Box<dyn AdvisorPlugin>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(EngineError::Config)?;

        Ok(Engine {
            config,
            store: EntryStore::new(),
            metrics: Metrics::new(),
            pruning: PruningController::new(),
            clock: self.clock.unwrap_or_else(|| Box::new(SystemClock)),
            estimator: self.estimator.unwrap_or_else(|| Box::new(HeuristicEstimator)),
            similarity: self.similarity.unwrap_or_else(|| Box::new(NoopSimilarity)),
            vector_store: self.vector_store.unwrap_or_else(|| Box::new(NullVectorStore)),
            advisor: self.advisor.unwrap_or_else(|| Box::new(NoAdvisor)),
        })
    }
}

/// Result blob for host-runtime hooks, matching the JSON field names in
/// spec §6.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HookResult {
    pub level: String,
    pub tokens_freed: u64,
    pub entries_removed: usize,
    pub compactions_prevented_delta: u64,
}

impl From<&PruneResult> for HookResult {
    fn from(result: &PruneResult) -> Self {
        Self {
            level: result.level_name.clone(),
            tokens_freed: result.tokens_freed,
            entries_removed: result.entries_removed,
            compactions_prevented_delta: 0,
        }
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn with_defaults() -> Result<Self, EngineError> {
        EngineBuilder::new().build()
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Insert a new entry, sized by the configured estimator (spec §4.G
    /// `add`).
    pub fn add(&mut self, content: &str, entry_type: EntryType, metadata: Metadata) -> EntryId {
        let now = self.now_ms();
        let sequence = self.store.next_sequence();
        let source = metadata.source.clone().unwrap_or_else(|| "unknown".to_string());
        let id = EntryId::generate(&source, sequence);

        let tokens = self.estimator.estimate(content, entry_type);
        let entry = Entry {
            id: id.clone(),
            content: content.to_string(),
            entry_type,
            tokens,
            tier: Tier::Hot,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            relevance: 0.5,
            metadata,
            compressed: None,
        };

        self.store.insert(entry);
        self.metrics.record_add();
        id
    }

    /// Record an access: bumps timestamp/count and, if `promote_on_access`
    /// is set, lets the next `transition_tiers()` pass restore it to `hot`
    /// (spec §4.G `access`). Unknown ids are a no-op, not an error.
    pub fn access(&mut self, id: &EntryId) {
        let now = self.now_ms();
        if self.store.touch(id, now) {
            self.metrics.record_access();
        }
    }

    /// Score every entry under `context` (spec §4.D `score_all`). When
    /// `session_isolation` is set and `context` carries a `session_id`, only
    /// that session's entries are read/scored — cross-session reads are
    /// forbidden (spec §4.B), so other sessions' content must never even be
    /// visited here, not just excluded from pruning candidates.
    pub fn score_all(&mut self, context: &ScoringContext) -> Vec<(EntryId, f64)> {
        let start = self.now_ms();
        let mut results = match (&context.session_id, self.config.session_isolation) {
            (Some(session_id), true) => scoring::score_all(
                self.store.by_session_mut(session_id),
                context,
                &self.config,
                &*self.similarity,
            ),
            _ => scoring::score_all(
                self.store.iter_mut_all(),
                context,
                &self.config,
                &*self.similarity,
            ),
        };

        for (id, score) in results.iter_mut() {
            let advised = self
                .store
                .get(id)
                .and_then(|entry| self.advisor.advise_score(entry, context));
            if let Some(advised) = advised {
                *score = advised.clamp(0.0, 1.0);
                self.store.set_relevance(id, *score);
            }
        }

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
        });
        self.metrics
            .scoring_latency_ms
            .record((self.now_ms() - start) as f64);
        results
    }

    fn context_for(&self, query: Option<String>, session_id: Option<String>) -> ScoringContext {
        ScoringContext {
            current_query: query,
            active_files: Vec::new(),
            active_tools: Vec::new(),
            session_id,
            timestamp: self.now_ms(),
            recent_entry_ids: Vec::new(),
        }
    }

    fn run_prune_cycle(&mut self, context: &ScoringContext) -> PruneResult {
        let now = self.now_ms();
        self.score_all(context);
        let decision = self.pruning.decide(&self.store, context, &self.config, &*self.similarity);

        let final_targets = self
            .advisor
            .advise_prune(&decision.targets, context)
            .unwrap_or(decision.targets.clone());
        let mut decision = decision;
        decision.targets = final_targets;

        let result = self.pruning.execute(
            &decision,
            &mut self.store,
            &self.config,
            &*self.vector_store,
            now,
        );
        self.metrics.pruning_latency_ms.record(result.duration_ms as f64);
        self.metrics.record_prune(&result.level_name);
        self.metrics.refresh_gauges(&self.store, self.config.context_window_size);
        self.pruning.record_compaction_outcome(decision.level != PressureLevel::None);
        result
    }

    /// Build a context, score, decide, and execute — the full pipeline
    /// triggered by a user prompt (spec §4.G `on_user_prompt_submit`).
    pub fn on_user_prompt_submit(&mut self, query: &str, session_id: Option<String>) -> PruneResult {
        let context = self.context_for(Some(query.to_string()), session_id);
        self.run_prune_cycle(&context)
    }

    /// Insert a `tool_result` entry, then trigger a lightweight prune if
    /// utilization has crossed `soft` (spec §4.G `on_post_tool_use`).
    pub fn on_post_tool_use(
        &mut self,
        tool_name: &str,
        tool_output: &str,
        session_id: Option<String>,
    ) -> EntryId {
        let metadata = Metadata {
            tool_name: Some(tool_name.to_string()),
            session_id: session_id.clone(),
            ..Default::default()
        };
        let id = self.add(tool_output, EntryType::ToolResult, metadata);

        let u = self.get_utilization();
        if u >= self.config.soft_threshold {
            let context = self.context_for(None, session_id);
            self.run_prune_cycle(&context);
        }
        id
    }

    /// Force at least `emergency`-level pruning so the host runtime can
    /// cancel its own compaction (spec §4.G `on_pre_compact`).
    pub fn on_pre_compact(&mut self, session_id: Option<String>) -> PruneResult {
        let context = self.context_for(None, session_id);
        let now = self.now_ms();
        self.score_all(&context);

        let decision = self.pruning.decide_at_level(
            &self.store,
            &context,
            &self.config,
            PressureLevel::Emergency,
            &*self.similarity,
        );

        let result = self.pruning.execute(
            &decision,
            &mut self.store,
            &self.config,
            &*self.vector_store,
            now,
        );
        self.metrics.pruning_latency_ms.record(result.duration_ms as f64);
        self.metrics.record_prune(&result.level_name);
        self.metrics.record_compaction_prevented();
        self.metrics.refresh_gauges(&self.store, self.config.context_window_size);
        info!(session_id = ?session_id, "pre-compact prune forced to emergency level");
        result
    }

    /// Batch tier-assignment pass (spec §4.G `transition_tiers`).
    pub fn transition_tiers(&mut self) -> TransitionResult {
        let now = self.now_ms();
        let result = tiering::transition_tiers(&mut self.store, &self.config, &*self.vector_store, now);
        self.metrics.refresh_gauges(&self.store, self.config.context_window_size);
        result
    }

    pub fn get_metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn get_utilization(&self) -> f64 {
        self.store.total_effective_tokens() as f64 / self.config.context_window_size.max(1) as f64
    }

    /// Read-only view over all entries (spec §4.G `get_entries`).
    pub fn get_entries(&self) -> impl Iterator<Item = &Entry> {
        self.store.iter()
    }

    /// Discard all entries and metrics, keeping configuration (spec §4.G
    /// `reset`).
    pub fn reset(&mut self) {
        self.store.reset();
        self.metrics = Metrics::new();
    }

    pub fn save_snapshot(&self) -> Value {
        metrics::save_snapshot(&self.store, &self.metrics, &self.config)
    }

    pub fn restore_snapshot(&mut self, blob: &Value) -> Result<(), SnapshotError> {
        let (store, restored_metrics) = metrics::restore(blob, &self.config)?;
        self.store = store;
        self.metrics = restored_metrics;
        Ok(())
    }

    pub fn hook_result(result: &PruneResult) -> Value {
        serde_json::to_value(HookResult::from(result)).unwrap_or(Value::Null)
    }
}

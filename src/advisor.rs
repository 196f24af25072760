use crate::entry::{Entry, EntryId};
use crate::scoring::ScoringContext;

/// Optional learned advisor, the abstraction behind which the repository's
/// per-language learning subsystem (GNN/GRNN/"hyperbolic" intelligence)
/// plugs in — its internal architecture is not part of this contract
/// (spec §4.H, §9). `None` means "no opinion, use the deterministic path."
/// The engine is fully functional and deterministic without one.
pub trait AdvisorPlugin: Send + Sync {
    /// Override or supplement the deterministic relevance score for a single
    /// entry under the given context.
    fn advise_score(&self, entry: &Entry, context: &ScoringContext) -> Option<f64>;

    /// Override the ordered candidate list the pruning controller would
    /// otherwise compute for the `adaptive` strategy.
    fn advise_prune(&self, candidates: &[EntryId], context: &ScoringContext) -> Option<Vec<EntryId>>;
}

/// The default: always defers to the deterministic path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdvisor;

impl AdvisorPlugin for NoAdvisor {
    fn advise_score(&self, _entry: &Entry, _context: &ScoringContext) -> Option<f64> {
        None
    }

    fn advise_prune(&self, _candidates: &[EntryId], _context: &ScoringContext) -> Option<Vec<EntryId>> {
        None
    }
}

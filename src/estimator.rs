use crate::entry::EntryType;

/// Maps content to an integer token count. Must be deterministic for
/// identical inputs (spec §4.A). The rest of the engine never assumes a
/// specific tokenizer — swap `HeuristicEstimator` for a real one without
/// touching any other component.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, content: &str, entry_type: EntryType) -> u32;
}

/// Default estimator: chars-per-token heuristic, varied by content type.
/// Generalizes the teacher's fixed `len / 4` heuristic
/// (`context::estimate_str_tokens`) into the type-aware table spec §4.A
/// calls for.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    fn chars_per_token(entry_type: EntryType) -> f64 {
        match entry_type {
            EntryType::FileRead | EntryType::FileWrite => 3.5,
            EntryType::ToolResult | EntryType::BashOutput => 3.0,
            EntryType::UserMessage | EntryType::AssistantMessage | EntryType::SystemPrompt => 4.0,
            EntryType::Other => 4.0,
        }
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, content: &str, entry_type: EntryType) -> u32 {
        if content.is_empty() {
            return 0;
        }
        let cpt = Self::chars_per_token(entry_type);
        ((content.chars().count() as f64) / cpt).ceil().max(1.0) as u32
    }
}

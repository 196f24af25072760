use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Opaque, unique-within-process entry identifier. Generated from
/// `source + sequence` on insert (spec §3) so ids are never reused even
/// across a clock reset — unlike the teacher's `memory::manager::generate_id`,
/// which derives from wall-clock nanoseconds and could theoretically collide
/// under a clock rollback.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub(crate) fn generate(source: &str, sequence: u64) -> Self {
        EntryId(format!("{source}:{sequence:x}"))
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of content an entry holds. Drives type-aware token estimation,
/// relevance priors, and compression extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    SystemPrompt,
    FileRead,
    FileWrite,
    ToolResult,
    BashOutput,
    UserMessage,
    AssistantMessage,
    Other,
}

impl EntryType {
    /// Fixed relevance prior used by the scorer (spec §4.D).
    pub fn type_prior(&self) -> f64 {
        match self {
            EntryType::SystemPrompt => 1.0,
            EntryType::UserMessage => 0.8,
            EntryType::AssistantMessage => 0.6,
            EntryType::FileRead | EntryType::FileWrite => 0.6,
            EntryType::ToolResult | EntryType::BashOutput => 0.4,
            EntryType::Other => 0.3,
        }
    }
}

/// Quality-of-service tier. Governs compression and relevance decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Archived,
}

/// The lossy-compression method applied when an entry was demoted out of
/// `hot` into a tier whose `compression_ratio < 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    Summary,
    Embedding,
    Hybrid,
}

/// Present iff `tier != Hot` and the tier's compression ratio is < 1.0
/// (invariant 3). Replaces the original `content` with a lossy surrogate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedState {
    pub method: CompressionMethod,
    pub summary: Option<String>,
    pub compressed_tokens: u32,
    pub ratio: f64,
    pub original_tokens: u32,
    pub compressed_at: i64,
}

/// Free-form provenance attached to an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub source: Option<String>,
    pub file_path: Option<String>,
    pub session_id: Option<String>,
    pub tool_name: Option<String>,
    pub tags: BTreeSet<String>,
}

/// The unit of caching (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub content: String,
    pub entry_type: EntryType,
    /// Original token count as sized at insertion. Immutable.
    pub tokens: u32,
    pub tier: Tier,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub access_count: u32,
    pub relevance: f64,
    pub metadata: Metadata,
    pub compressed: Option<CompressedState>,
}

impl Entry {
    /// What counts toward utilization (invariant 4).
    pub fn effective_tokens(&self) -> u32 {
        self.compressed
            .as_ref()
            .map(|c| c.compressed_tokens)
            .unwrap_or(self.tokens)
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.created_at).max(0)
    }

    pub fn idle_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.last_accessed_at).max(0)
    }
}

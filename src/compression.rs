use crate::config::CompressionStrategy;
use crate::entry::{CompressedState, CompressionMethod, Entry, EntryType};
use crate::vector_store::VectorStore;

/// Fixed small footprint charged for an `embedding` surrogate, representing
/// the reference's amortized cost rather than any real content (spec §4.C).
const EMBEDDING_HANDLE_TOKENS: u32 = 10;

/// Extra tokens charged for the embedding-reference marker prepended to a
/// `hybrid` summary.
const HYBRID_MARKER_TOKENS: u32 = 5;

const KEYWORD_SET: &[&str] = &[
    "must", "should", "important", "error", "fix", "implement", "create", "update", "delete",
];

const DECLARATION_PREFIXES: &[&str] = &["import", "export", "function", "class", "interface", "type"];

/// Attempt to compress `entry` into a `target_tokens`-sized surrogate using
/// `strategy`. Returns `None` if the compression invariant would be
/// violated (surrogate would not shrink `effective_tokens`) — the caller
/// must keep the original content in that case (spec §4.C).
pub fn compress(
    entry: &Entry,
    target_tokens: u32,
    strategy: CompressionStrategy,
    vector_store: &dyn VectorStore,
    now_ms: i64,
) -> Option<CompressedState> {
    let state = match strategy {
        CompressionStrategy::Summary => compress_summary(entry, target_tokens, now_ms),
        CompressionStrategy::Embedding => compress_embedding(entry, vector_store, now_ms),
        CompressionStrategy::Hybrid => compress_hybrid(entry, target_tokens, now_ms),
    };

    match state {
        Some(s) if s.compressed_tokens < entry.tokens => Some(s),
        _ => None,
    }
}

fn compress_summary(entry: &Entry, target_tokens: u32, now_ms: i64) -> Option<CompressedState> {
    let summary = extractive_summary(entry, target_tokens);
    let compressed_tokens = char_tokens(&summary).min(entry.tokens.saturating_sub(1).max(1));
    Some(CompressedState {
        method: CompressionMethod::Summary,
        summary: Some(summary),
        compressed_tokens,
        ratio: compressed_tokens as f64 / entry.tokens.max(1) as f64,
        original_tokens: entry.tokens,
        compressed_at: now_ms,
    })
}

fn compress_embedding(
    entry: &Entry,
    vector_store: &dyn VectorStore,
    now_ms: i64,
) -> Option<CompressedState> {
    let handle = vector_store.put(&entry.id.0, &entry.content).ok()?;
    Some(CompressedState {
        method: CompressionMethod::Embedding,
        summary: Some(handle),
        compressed_tokens: EMBEDDING_HANDLE_TOKENS,
        ratio: EMBEDDING_HANDLE_TOKENS as f64 / entry.tokens.max(1) as f64,
        original_tokens: entry.tokens,
        compressed_at: now_ms,
    })
}

fn compress_hybrid(entry: &Entry, target_tokens: u32, now_ms: i64) -> Option<CompressedState> {
    let summary_target = (target_tokens as f64 * 0.7).ceil() as u32;
    let summary = extractive_summary(entry, summary_target.max(1));
    let summary_tokens = char_tokens(&summary);
    let marker = "[embedding-ref] ";
    let combined = format!("{marker}{summary}");
    Some(CompressedState {
        method: CompressionMethod::Hybrid,
        summary: Some(combined),
        compressed_tokens: summary_tokens + HYBRID_MARKER_TOKENS,
        ratio: (summary_tokens + HYBRID_MARKER_TOKENS) as f64 / entry.tokens.max(1) as f64,
        original_tokens: entry.tokens,
        compressed_at: now_ms,
    })
}

fn char_tokens(s: &str) -> u32 {
    ((s.chars().count() as f64 / 4.0).ceil() as u32).max(1)
}

fn extractive_summary(entry: &Entry, target_tokens: u32) -> String {
    let target_chars = (target_tokens as usize * 4).max(1);
    match entry.entry_type {
        EntryType::FileRead | EntryType::FileWrite => {
            let kept: String = entry
                .content
                .lines()
                .filter(|line| {
                    let trimmed = line.trim_start();
                    DECLARATION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
                })
                .collect::<Vec<_>>()
                .join("\n");
            truncate_chars(if kept.is_empty() { &entry.content } else { &kept }, target_chars)
        }
        EntryType::ToolResult | EntryType::BashOutput => {
            if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&entry.content) {
                let per_field = target_chars / map.len().max(1);
                map.iter()
                    .map(|(k, v)| format!("{k}={}", truncate_chars(&v.to_string(), per_field)))
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                head_tail_slice(&entry.content, target_chars)
            }
        }
        EntryType::UserMessage | EntryType::AssistantMessage => {
            let matches: Vec<&str> = entry
                .content
                .split(['.', '!', '?'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter(|s| {
                    let lower = s.to_lowercase();
                    KEYWORD_SET.iter().any(|kw| lower.contains(kw))
                })
                .collect();
            if !matches.is_empty() && matches.iter().map(|s| s.len()).sum::<usize>() >= target_chars / 2 {
                truncate_chars(&matches.join(". "), target_chars)
            } else {
                let head = truncate_chars(&entry.content, target_chars / 2);
                format!("{head} {}", truncate_chars(&matches.join(". "), target_chars / 2))
            }
        }
        EntryType::SystemPrompt | EntryType::Other => truncate_chars(&entry.content, target_chars),
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

fn head_tail_slice(s: &str, target_chars: usize) -> String {
    let half = target_chars / 2;
    if s.chars().count() <= target_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(half).collect();
    let tail: String = s.chars().rev().take(half).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryId, Metadata, Tier};
    use crate::vector_store::NullVectorStore;

    fn entry(entry_type: EntryType, content: &str, tokens: u32) -> Entry {
        Entry {
            id: EntryId("e1".into()),
            content: content.to_string(),
            entry_type,
            tokens,
            tier: Tier::Hot,
            created_at: 0,
            last_accessed_at: 0,
            access_count: 0,
            relevance: 0.5,
            metadata: Metadata::default(),
            compressed: None,
        }
    }

    #[test]
    fn summary_compression_shrinks_tokens() {
        let e = entry(EntryType::Other, &"word ".repeat(500), 600);
        let state = compress(&e, 60, CompressionStrategy::Summary, &NullVectorStore, 0).unwrap();
        assert!(state.compressed_tokens < e.tokens);
    }

    #[test]
    fn embedding_compression_uses_fixed_handle_size() {
        let e = entry(EntryType::ToolResult, &"word ".repeat(500), 600);
        let state = compress(&e, 60, CompressionStrategy::Embedding, &NullVectorStore, 0).unwrap();
        assert_eq!(state.compressed_tokens, EMBEDDING_HANDLE_TOKENS);
    }

    #[test]
    fn hybrid_includes_marker_overhead() {
        let e = entry(EntryType::AssistantMessage, &"must fix the important bug. ".repeat(20), 200);
        let state = compress(&e, 60, CompressionStrategy::Hybrid, &NullVectorStore, 0).unwrap();
        assert!(state.summary.unwrap().starts_with("[embedding-ref]"));
    }

    #[test]
    fn refuses_compression_that_would_grow_tokens() {
        let e = entry(EntryType::Other, "tiny", 1);
        let state = compress(&e, 10, CompressionStrategy::Summary, &NullVectorStore, 0);
        assert!(state.is_none());
    }

    #[test]
    fn file_read_keeps_declaration_lines() {
        let content = "import foo\nlet x = 1;\nexport function bar() {}\n";
        let e = entry(EntryType::FileRead, content, 40);
        let state = compress(&e, 10, CompressionStrategy::Summary, &NullVectorStore, 0).unwrap();
        let summary = state.summary.unwrap();
        assert!(summary.contains("import foo") || summary.contains("export function bar"));
    }
}

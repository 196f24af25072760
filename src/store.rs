use std::collections::HashMap;

use tracing::debug;

use crate::entry::{Entry, EntryId, Tier};

/// Owning collection of entries with secondary indices (spec §4.B). The
/// only component that mutates `tier`/`compressed`/access bookkeeping on an
/// entry is this store (via the setters below) or `access()` through it —
/// so `total_effective_tokens` can be maintained incrementally rather than
/// recomputed, satisfying invariant 1 by construction.
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: HashMap<EntryId, Entry>,
    insertion_order: Vec<EntryId>,
    total_effective_tokens: u64,
    next_sequence: u64,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// O(1) amortized insert.
    pub fn insert(&mut self, entry: Entry) -> EntryId {
        let id = entry.id.clone();
        self.total_effective_tokens += entry.effective_tokens() as u64;
        self.insertion_order.push(id.clone());
        debug!(id = %id, entry_type = ?entry.entry_type, tokens = entry.tokens, "entry inserted");
        self.entries.insert(id.clone(), entry);
        id
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    /// Removes an entry, returning it. `None` (not-found) is a recoverable
    /// signal, never an error (spec §4.B Failure).
    pub fn remove(&mut self, id: &EntryId) -> Option<Entry> {
        let removed = self.entries.remove(id)?;
        self.total_effective_tokens = self
            .total_effective_tokens
            .saturating_sub(removed.effective_tokens() as u64);
        self.insertion_order.retain(|existing| existing != id);
        debug!(id = %id, "entry removed");
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.insertion_order
            .iter()
            .filter_map(move |id| self.entries.get(id))
    }

    /// Mutable access to every entry, used by the scorer to write
    /// `relevance` back in place. Order is not guaranteed.
    pub fn iter_mut_all(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.values_mut()
    }

    /// Entries whose `metadata.source` equals `source`, insertion order.
    pub fn by_source<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Entry> {
        self.iter()
            .filter(move |e| e.metadata.source.as_deref() == Some(source))
    }

    /// Entries whose `metadata.file_path` equals `path`, insertion order.
    pub fn by_file_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Entry> {
        self.iter()
            .filter(move |e| e.metadata.file_path.as_deref() == Some(path))
    }

    /// Entries scoped to `session_id`, insertion order. When
    /// `session_isolation` is enabled, callers MUST go through this rather
    /// than `iter()` directly — cross-session reads are forbidden (spec
    /// §4.B).
    pub fn by_session<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a Entry> {
        self.iter()
            .filter(move |e| e.metadata.session_id.as_deref() == Some(session_id))
    }

    /// Mutable equivalent of [`EntryStore::by_session`], for scoring passes
    /// that must write `relevance` back without reading other sessions'
    /// entries at all (spec §4.B cross-session read prohibition).
    pub fn by_session_mut<'a>(
        &'a mut self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a mut Entry> {
        self.entries
            .values_mut()
            .filter(move |e| e.metadata.session_id.as_deref() == Some(session_id))
    }

    pub fn by_tier(&self, tier: Tier) -> impl Iterator<Item = &Entry> {
        self.iter().filter(move |e| e.tier == tier)
    }

    /// Sum of `effective_tokens()` across every entry, maintained
    /// incrementally rather than recomputed (invariant 1).
    pub fn total_effective_tokens(&self) -> u64 {
        self.total_effective_tokens
    }

    /// Apply a tier/compression change to an entry, updating the running
    /// total atomically. The only path by which `tier`/`compressed` may
    /// change after insertion.
    pub fn update_tier(&mut self, id: &EntryId, new_tier: Tier, compressed: Option<crate::entry::CompressedState>) {
        if let Some(entry) = self.entries.get_mut(id) {
            let before = entry.effective_tokens() as u64;
            entry.tier = new_tier;
            entry.compressed = compressed;
            let after = entry.effective_tokens() as u64;
            self.total_effective_tokens = self.total_effective_tokens - before + after;
        }
    }

    /// Update access bookkeeping (`last_accessed_at`, `access_count`).
    /// Returns `false` if `id` is unknown (not-found, not an error).
    pub fn touch(&mut self, id: &EntryId, now_ms: i64) -> bool {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_accessed_at = now_ms;
            entry.access_count += 1;
            true
        } else {
            false
        }
    }

    pub fn set_relevance(&mut self, id: &EntryId, relevance: f64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.relevance = relevance;
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        self.total_effective_tokens = 0;
        self.next_sequence = 0;
    }
}

//! Precomputed top-K similarity lists, one per indexed document.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::Sims;
use crate::DocumentId;

/// Ranked peer lists keyed by document id.
///
/// Entries are never purged when a peer is deleted. Readers filter dead peers
/// through [`live_entry`](Self::live_entry), and merges drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityCache {
    top_sims: usize,
    entries: HashMap<DocumentId, Sims>,
}

impl SimilarityCache {
    pub fn new(top_sims: usize) -> Self {
        Self {
            top_sims,
            entries: HashMap::new(),
        }
    }

    /// Maximum number of peers kept per entry.
    pub fn top_sims(&self) -> usize {
        self.top_sims
    }

    /// Raw entry, possibly still listing deleted peers.
    pub fn get(&self, id: &DocumentId) -> Option<&Sims> {
        self.entries.get(id)
    }

    /// Entry for `id` with every peer rejected by `is_live` filtered out.
    pub fn live_entry<F>(&self, id: &DocumentId, is_live: F) -> Option<Sims>
    where
        F: Fn(&DocumentId) -> bool,
    {
        self.entries.get(id).map(|sims| {
            sims.iter()
                .filter(|(peer, _)| is_live(peer))
                .cloned()
                .collect()
        })
    }

    /// Stores `sims` for `id`, returning the entry it replaced.
    pub fn set(&mut self, id: DocumentId, mut sims: Sims) -> Option<Sims> {
        sims.truncate(self.top_sims);
        self.entries.insert(id, sims)
    }

    pub fn remove(&mut self, id: &DocumentId) -> Option<Sims> {
        self.entries.remove(id)
    }

    /// Drops entries whose owner is no longer live.
    pub fn retain_owners<F>(&mut self, is_live: F) -> usize
    where
        F: Fn(&DocumentId) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|id, _| is_live(id));
        before - self.entries.len()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merges a document's cached list with scores against a new batch.
///
/// Old peers rejected by `keep_old` (deleted, or superseded by a copy in the
/// new batch) are dropped. The result is sorted by descending score, holds
/// each peer once and at most `cap` entries. Equal scores keep old peers first.
pub fn merge_sims<F>(old: &[(DocumentId, f32)], new: Sims, cap: usize, keep_old: F) -> Sims
where
    F: Fn(&DocumentId) -> bool,
{
    let mut merged: Sims = old
        .iter()
        .filter(|(peer, _)| keep_old(peer))
        .cloned()
        .chain(new)
        .collect();
    merged.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut seen = HashSet::with_capacity(merged.len());
    merged.retain(|(peer, _)| seen.insert(peer.clone()));
    merged.truncate(cap);
    merged
}

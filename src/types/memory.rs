use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::Value;

#[derive(Debug, Clone)]
struct MemoEntry {
    value: Value,
    dirty: bool,
}

/// Hit, miss and invalidation counters since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Per-instance cache of node values keyed by structural signature.
///
/// An entry is either clean (its value may be reused) or dirty (a fact it
/// reads has been written since it was recorded). Entries are indexed by
/// the root identifiers their nodes read, so a write to `Fact.X` dirties
/// every entry that reads anything under `Fact`.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    entries: HashMap<Arc<str>, MemoEntry>,
    by_root: HashMap<String, Vec<Arc<str>>>,
    epoch: u64,
    stats: MemoryStats,
}

impl WorkingMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clean value for `signature`, counting a hit or a miss.
    pub(crate) fn lookup(&mut self, signature: &str) -> Option<Value> {
        match self.entries.get(signature) {
            Some(entry) if !entry.dirty => {
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            _ => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Clean value for `signature` without touching the counters.
    #[must_use]
    pub fn peek(&self, signature: &str) -> Option<&Value> {
        self.entries
            .get(signature)
            .filter(|entry| !entry.dirty)
            .map(|entry| &entry.value)
    }

    /// `Some(true)` if recorded and dirty, `None` if never recorded.
    #[must_use]
    pub fn is_dirty(&self, signature: &str) -> Option<bool> {
        self.entries.get(signature).map(|entry| entry.dirty)
    }

    pub(crate) fn record(&mut self, signature: &Arc<str>, roots: &[String], value: Value) {
        let fresh = !self.entries.contains_key(signature);
        self.entries.insert(
            Arc::clone(signature),
            MemoEntry {
                value,
                dirty: false,
            },
        );
        if fresh {
            for root in roots {
                self.by_root
                    .entry(root.clone())
                    .or_default()
                    .push(Arc::clone(signature));
            }
        }
    }

    /// Mark every entry reading `root` dirty. Returns how many flipped.
    pub fn invalidate_root(&mut self, root: &str) -> usize {
        let Some(signatures) = self.by_root.get(root) else {
            return 0;
        };
        let mut flipped = 0;
        for sig in signatures {
            if let Some(entry) = self.entries.get_mut(sig) {
                if !entry.dirty {
                    entry.dirty = true;
                    flipped += 1;
                }
            }
        }
        self.stats.invalidations += flipped as u64;
        trace!(root, flipped, "working memory invalidated");
        flipped
    }

    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.dirty = true;
        }
    }

    /// Drop every entry and start a new epoch.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.by_root.clear();
        self.stats = MemoryStats::default();
        self.epoch += 1;
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.dirty).count()
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }
}

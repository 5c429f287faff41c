//! ExplanationCache implementation.

use fundus_abstraction::ExplanationResult;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::fingerprint::Fingerprint;

/// Fingerprint-keyed store of previously computed explanation artifacts.
///
/// Memoizes the expensive secondary computation so repeated requests for the
/// same image+options pair are free. Process-scoped and unbounded: entries
/// survive until [`clear`](Self::clear) or process exit, and are never
/// invalidated automatically: a changed image under the same name, size, and
/// mtime silently returns the stored explanation. That is the documented
/// weak-identity limitation of the fingerprint, not a cache defect.
#[derive(Debug, Default)]
pub struct ExplanationCache {
    /// The cache storage (fingerprint -> explanation).
    entries: RwLock<HashMap<Fingerprint, ExplanationResult>>,
    /// Hit/miss counters.
    stats: RwLock<Counters>,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    total_hits: u64,
    total_misses: u64,
}

/// Snapshot of cache contents for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Current number of stored explanations.
    pub entry_count: usize,
    /// Total number of cache hits.
    pub total_hits: u64,
    /// Total number of cache misses.
    pub total_misses: u64,
    /// Fingerprints currently present.
    pub keys: Vec<Fingerprint>,
}

impl ExplanationCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an explanation. No side effects beyond hit/miss accounting;
    /// never blocks on network.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ExplanationResult> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let found = entries.get(fingerprint).cloned();
        drop(entries);

        let mut stats = self.stats.write().expect("stats lock poisoned");
        if found.is_some() {
            stats.total_hits += 1;
            debug!(fingerprint = %fingerprint, "Explanation cache hit");
        } else {
            stats.total_misses += 1;
            debug!(fingerprint = %fingerprint, "Explanation cache miss");
        }

        found
    }

    /// Stores an explanation, overwriting any prior entry unconditionally.
    /// Inputs are content-addressed, so last-write-wins needs no versioning.
    pub fn put(&self, fingerprint: Fingerprint, result: ExplanationResult) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let replaced = entries.insert(fingerprint.clone(), result).is_some();
        debug!(fingerprint = %fingerprint, replaced, "Explanation cached");
    }

    /// Whether an explanation is stored for the fingerprint.
    pub fn has(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.read().expect("cache lock poisoned").contains_key(fingerprint)
    }

    /// Drops all entries. Invoked by the caller on logout or a
    /// memory-pressure signal; nothing triggers it automatically.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let cleared_count = entries.len();
        entries.clear();
        info!(cleared_count, "Cleared explanation cache");
    }

    /// Get current cache statistics.
    ///
    /// # Returns
    /// A snapshot of entry count, hit/miss totals, and stored fingerprints.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().expect("cache lock poisoned");
        let counters = self.stats.read().expect("stats lock poisoned").clone();
        CacheStats {
            entry_count: entries.len(),
            total_hits: counters.total_hits,
            total_misses: counters.total_misses,
            keys: entries.keys().cloned().collect(),
        }
    }
}

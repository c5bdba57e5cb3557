//! Result cache for stateless rule evaluations.
//!
//! Keyed by rule id plus a fingerprint of the fields the rule reads, so
//! two events that agree on every referenced field share an entry. TTL is
//! revalidated on every read; expired entries are removed lazily on access
//! and in bulk by [`ResultCache::sweep`].

use crate::eval::EvaluationResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry {
    result: EvaluationResult,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Shared cache of stateless evaluation outcomes.
pub struct ResultCache {
    entries: RwLock<HashMap<(String, u64), CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        ResultCache {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached result, counting the outcome. An expired entry is
    /// a miss and is dropped on the spot.
    pub fn get(&self, rule_id: &str, fingerprint: u64) -> Option<EvaluationResult> {
        let key = (rule_id.to_string(), fingerprint);
        let now = Instant::now();

        let expired = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(&key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.result.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        if expired {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            // Re-check under the write lock; a concurrent insert may have
            // refreshed the entry since the read.
            if entries.get(&key).is_some_and(|e| e.is_expired(Instant::now())) {
                entries.remove(&key);
            }
        }
        None
    }

    pub fn insert(&self, rule_id: &str, fingerprint: u64, result: EvaluationResult, ttl: Duration) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (rule_id.to_string(), fingerprint),
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Drop every entry for one rule, used when the rule is reloaded.
    pub fn invalidate_rule(&self, rule_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(id, _), _| id != rule_id);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit ratio over everything served so far, in [0, 1].
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

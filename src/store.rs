//! External state store abstractions.
//!
//! Stateful rule types keep their cross-event state (threshold counters,
//! sequence progress) in a key/value store that may be shared across engine
//! instances. Per-key serialization therefore happens through the store's
//! atomic operations, not in-process locks: `incr_with_ttl` for counters and
//! `compare_and_swap` for sequence transitions.
//!
//! [`MemoryStore`] is the bundled single-process implementation, sharded to
//! keep lock contention low under high event rates.

use crate::error::{EngineError, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Key/value operations consumed by the stateful evaluation strategies.
pub trait CorrelationStore: Send + Sync {
    /// Read a string value; expired entries read as absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value with a TTL.
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically increment a counter. The first increment creates the
    /// counter and sets its TTL; later increments leave the TTL untouched
    /// so expiry follows the rule's window exactly.
    fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Append an item to a list, creating it with the TTL when absent.
    fn append_with_ttl(&self, key: &str, item: &str, ttl: Duration) -> Result<()>;

    /// Read a list range (inclusive start, exclusive end; end of
    /// `usize::MAX` reads to the tail).
    fn list_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<String>>;

    /// Atomically replace a value only if the current value matches
    /// `expected` (`None` means the key must be absent). Returns whether
    /// the swap happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Remove a key.
    fn delete(&self, key: &str) -> Result<()>;

    /// Reclaim expired entries eagerly. Correctness never depends on this
    /// hook; expired keys already read as absent. Stores with server-side
    /// expiry leave it as the no-op default.
    fn maintain(&self) {}
}

/// Behavioral baseline queried by ml-based rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    /// Confidence in the baseline itself, 0.0 to 1.0.
    pub confidence: f64,
}

/// Read-only baseline lookup; absence of a row is not an error.
pub trait BaselineStore: Send + Sync {
    fn query(&self, entity_type: &str, entity_id: &str, metric: &str) -> Result<Option<Baseline>>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Counter(u64),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

const SHARD_COUNT: usize = 16;

/// In-memory sharded correlation store.
pub struct MemoryStore {
    shards: Vec<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn lock_shard(&self, key: &str) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.shard(key)
            .lock()
            .map_err(|_| EngineError::StoreError("store shard lock poisoned".to_string()))
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            if let Ok(mut map) = shard.lock() {
                let before = map.len();
                map.retain(|_, entry| !entry.expired(now));
                removed += before - map.len();
            }
        }
        removed
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .filter_map(|s| s.lock().ok())
            .map(|map| map.values().filter(|e| !e.expired(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut map = self.lock_shard(key)?;
        match map.get(key) {
            Some(entry) if entry.expired(now) => {
                map.remove(key);
                Ok(None)
            }
            Some(entry) => match &entry.value {
                StoredValue::Text(s) => Ok(Some(s.clone())),
                StoredValue::Counter(n) => Ok(Some(n.to_string())),
                StoredValue::List(_) => Err(EngineError::StoreError(format!(
                    "key {key} holds a list, not a scalar"
                ))),
            },
            None => Ok(None),
        }
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut map = self.lock_shard(key)?;
        map.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut map = self.lock_shard(key)?;
        match map.get_mut(key) {
            Some(entry) if !entry.expired(now) => match &mut entry.value {
                StoredValue::Counter(n) => {
                    *n += 1;
                    Ok(*n)
                }
                _ => Err(EngineError::StoreError(format!(
                    "key {key} is not a counter"
                ))),
            },
            _ => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::Counter(1),
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }

    fn append_with_ttl(&self, key: &str, item: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut map = self.lock_shard(key)?;
        match map.get_mut(key) {
            Some(entry) if !entry.expired(now) => match &mut entry.value {
                StoredValue::List(items) => {
                    items.push(item.to_string());
                    Ok(())
                }
                _ => Err(EngineError::StoreError(format!("key {key} is not a list"))),
            },
            _ => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: StoredValue::List(vec![item.to_string()]),
                        expires_at: now + ttl,
                    },
                );
                Ok(())
            }
        }
    }

    fn list_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut map = self.lock_shard(key)?;
        match map.get(key) {
            Some(entry) if entry.expired(now) => {
                map.remove(key);
                Ok(Vec::new())
            }
            Some(entry) => match &entry.value {
                StoredValue::List(items) => {
                    let end = end.min(items.len());
                    if start >= end {
                        return Ok(Vec::new());
                    }
                    Ok(items[start..end].to_vec())
                }
                _ => Err(EngineError::StoreError(format!("key {key} is not a list"))),
            },
            None => Ok(Vec::new()),
        }
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut map = self.lock_shard(key)?;
        let current = match map.get(key) {
            Some(entry) if !entry.expired(now) => match &entry.value {
                StoredValue::Text(s) => Some(s.clone()),
                StoredValue::Counter(n) => Some(n.to_string()),
                StoredValue::List(_) => {
                    return Err(EngineError::StoreError(format!(
                        "key {key} is not a scalar"
                    )))
                }
            },
            _ => None,
        };

        if current.as_deref() != expected {
            return Ok(false);
        }

        map.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Text(new.to_string()),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.lock_shard(key)?;
        map.remove(key);
        Ok(())
    }

    fn maintain(&self) {
        self.sweep();
    }
}

/// In-memory baseline store, primarily for tests and local deployments.
pub struct MemoryBaselineStore {
    baselines: Mutex<HashMap<(String, String, String), Baseline>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self {
            baselines: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(
        &self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        metric: impl Into<String>,
        baseline: Baseline,
    ) {
        if let Ok(mut map) = self.baselines.lock() {
            map.insert((entity_type.into(), entity_id.into(), metric.into()), baseline);
        }
    }
}

impl Default for MemoryBaselineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn query(&self, entity_type: &str, entity_id: &str, metric: &str) -> Result<Option<Baseline>> {
        let map = self
            .baselines
            .lock()
            .map_err(|_| EngineError::StoreError("baseline lock poisoned".to_string()))?;
        Ok(map
            .get(&(
                entity_type.to_string(),
                entity_id.to_string(),
                metric.to_string(),
            ))
            .copied())
    }
}

/// Store wrapper that always reports unavailability. Used in tests to
/// exercise the engine's stateless-only degraded mode.
pub struct UnavailableStore;

impl CorrelationStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(EngineError::StoreUnavailable)
    }

    fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(EngineError::StoreUnavailable)
    }

    fn incr_with_ttl(&self, _key: &str, _ttl: Duration) -> Result<u64> {
        Err(EngineError::StoreUnavailable)
    }

    fn append_with_ttl(&self, _key: &str, _item: &str, _ttl: Duration) -> Result<()> {
        Err(EngineError::StoreUnavailable)
    }

    fn list_range(&self, _key: &str, _start: usize, _end: usize) -> Result<Vec<String>> {
        Err(EngineError::StoreUnavailable)
    }

    fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&str>,
        _new: &str,
        _ttl: Duration,
    ) -> Result<bool> {
        Err(EngineError::StoreUnavailable)
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Err(EngineError::StoreUnavailable)
    }
}

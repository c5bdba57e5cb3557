//! Shared compiled-regex cache.
//!
//! Patterns come from rule conditions and repeat across events, so each
//! unique (pattern, case flag) pair compiles once and is shared behind an
//! `Arc`. Compilation failures are cached too, so a bad pattern costs one
//! compile attempt instead of one per event.

use crate::error::{EngineError, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub struct RegexCache {
    compiled: RwLock<HashMap<(String, bool), std::result::Result<Arc<Regex>, String>>>,
    hits: AtomicU64,
    compilations: AtomicU64,
}

impl RegexCache {
    pub fn new() -> Self {
        RegexCache {
            compiled: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
        }
    }

    /// Fetch or compile a pattern. A previously failed pattern returns
    /// the original error without recompiling.
    pub fn get_or_compile(&self, pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>> {
        let key = (pattern.to_string(), case_sensitive);
        {
            let compiled = self.compiled.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = compiled.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.clone().map_err(EngineError::InvalidRegex);
            }
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        let outcome = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .size_limit(1 << 20)
            .build()
            .map(Arc::new)
            .map_err(|err| format!("{pattern}: {err}"));

        let mut compiled = self.compiled.write().unwrap_or_else(|e| e.into_inner());
        let entry = compiled.entry(key).or_insert(outcome);
        entry.clone().map_err(EngineError::InvalidRegex)
    }

    pub fn len(&self) -> usize {
        self.compiled
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

    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new()
    }
}

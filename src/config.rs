//! Engine configuration.
//!
//! All runtime knobs live in [`EngineConfig`]. The engine holds its
//! configuration behind a shared [`ConfigHandle`] so that callers and the
//! adaptive tuner can reconfigure a running engine without downtime.

use crate::error::{EngineError, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Runtime configuration for the correlation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Wall-clock budget for a single event evaluation. Enforced between
    /// rules: remaining rules are skipped once the budget is spent, but a
    /// rule that is already evaluating runs to completion.
    pub max_processing_time: Duration,
    /// Batch buffer flush threshold.
    pub batch_size: usize,
    /// Fixed chunk size for parallel batch dispatch.
    pub chunk_size: usize,
    /// Maximum time a buffered event waits before a time-triggered flush.
    pub flush_interval: Duration,
    /// TTL for cached stateless evaluation results.
    pub cache_ttl: Duration,
    /// Evaluate batch chunks in parallel.
    pub parallel_evaluation: bool,
    /// Allow synchronous single-event evaluation when eligible.
    pub fast_path_enabled: bool,
    /// Consult the circuit breaker before dispatching work.
    pub circuit_breaker_enabled: bool,
    /// Windowed failure count that opens the breaker.
    pub breaker_threshold: u32,
    /// Time the breaker stays open before allowing trial evaluations.
    pub breaker_timeout: Duration,
    /// Rolling window for the breaker failure tally.
    pub breaker_window: Duration,
    /// Trial evaluations permitted in the half-open state.
    pub breaker_half_open_trials: u32,
    /// In-flight event ceiling; exceeding it is an overload signal.
    pub max_concurrent_events: usize,
    /// Order buffered events by priority before dispatch.
    pub priority_queue_enabled: bool,
    /// Capacity of the bounded match-emission queue.
    pub emit_queue_capacity: usize,
}

impl EngineConfig {
    /// Configuration tuned for interactive, low-latency workloads.
    pub fn low_latency() -> Self {
        Self {
            max_processing_time: Duration::from_millis(50),
            batch_size: 50,
            chunk_size: 10,
            flush_interval: Duration::from_millis(20),
            cache_ttl: Duration::from_secs(30),
            parallel_evaluation: false,
            fast_path_enabled: true,
            circuit_breaker_enabled: true,
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(10),
            breaker_window: Duration::from_secs(30),
            breaker_half_open_trials: 1,
            max_concurrent_events: 256,
            priority_queue_enabled: true,
            emit_queue_capacity: 1_024,
        }
    }

    /// Configuration tuned for bulk ingestion throughput.
    pub fn high_throughput() -> Self {
        Self {
            max_processing_time: Duration::from_millis(500),
            batch_size: 1_000,
            chunk_size: 100,
            flush_interval: Duration::from_millis(200),
            cache_ttl: Duration::from_secs(300),
            parallel_evaluation: true,
            fast_path_enabled: false,
            circuit_breaker_enabled: true,
            breaker_threshold: 20,
            breaker_timeout: Duration::from_secs(30),
            breaker_window: Duration::from_secs(60),
            breaker_half_open_trials: 3,
            max_concurrent_events: 4_096,
            priority_queue_enabled: false,
            emit_queue_capacity: 16_384,
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EngineError::ConfigError("batch_size must be > 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::ConfigError("chunk_size must be > 0".to_string()));
        }
        if self.chunk_size > self.batch_size {
            return Err(EngineError::ConfigError(format!(
                "chunk_size {} exceeds batch_size {}",
                self.chunk_size, self.batch_size
            )));
        }
        if self.max_processing_time.is_zero() {
            return Err(EngineError::ConfigError(
                "max_processing_time must be > 0".to_string(),
            ));
        }
        if self.breaker_threshold == 0 {
            return Err(EngineError::ConfigError(
                "breaker_threshold must be > 0".to_string(),
            ));
        }
        if self.breaker_half_open_trials == 0 {
            return Err(EngineError::ConfigError(
                "breaker_half_open_trials must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_events == 0 {
            return Err(EngineError::ConfigError(
                "max_concurrent_events must be > 0".to_string(),
            ));
        }
        if self.emit_queue_capacity == 0 {
            return Err(EngineError::ConfigError(
                "emit_queue_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_processing_time: Duration::from_millis(200),
            batch_size: 200,
            chunk_size: 50,
            flush_interval: Duration::from_millis(100),
            cache_ttl: Duration::from_secs(60),
            parallel_evaluation: true,
            fast_path_enabled: true,
            circuit_breaker_enabled: true,
            breaker_threshold: 10,
            breaker_timeout: Duration::from_secs(15),
            breaker_window: Duration::from_secs(60),
            breaker_half_open_trials: 2,
            max_concurrent_events: 1_024,
            priority_queue_enabled: true,
            emit_queue_capacity: 4_096,
        }
    }
}

/// Shared, hot-reconfigurable view of the engine configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> EngineConfig {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Replace the configuration after validating it.
    pub fn replace(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write().expect("config lock poisoned") = config;
        Ok(())
    }

    /// Apply an in-place mutation; invalid outcomes are rejected and the
    /// previous configuration is kept.
    pub fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.validate()?;
        *guard = candidate;
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

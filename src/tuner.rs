//! Adaptive performance tuning.
//!
//! A periodic tick inspects the latest metrics snapshot and nudges the
//! runtime configuration: batch size shrinks and the fast path is
//! switched off when p99 latency blows the processing budget, cache TTL
//! grows when the hit ratio is poor, and after a sustained healthy streak
//! everything relaxes back toward the baseline values. Every adjustment
//! is clamped to configured bounds and applied through the validated
//! config handle, so a tick can never produce an invalid configuration.

use crate::config::{ConfigHandle, EngineConfig};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Bounds for every knob the tuner may touch.
#[derive(Debug, Clone)]
pub struct TunerLimits {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub max_cache_ttl: Duration,
    /// Consecutive healthy ticks before constraints relax.
    pub healthy_ticks_to_relax: u32,
    /// Hit ratio below which the cache TTL is raised.
    pub low_hit_ratio: f64,
}

impl Default for TunerLimits {
    fn default() -> Self {
        TunerLimits {
            min_batch_size: 10,
            max_batch_size: 2_000,
            max_cache_ttl: Duration::from_secs(600),
            healthy_ticks_to_relax: 5,
            low_hit_ratio: 0.2,
        }
    }
}

/// What a single tick decided, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuningAction {
    /// p99 over budget: batch shrunk, fast path off.
    Tightened { new_batch_size: usize },
    /// Cold cache: TTL raised.
    RaisedCacheTtl { new_ttl: Duration },
    /// Sustained health: moved back toward baseline.
    Relaxed { new_batch_size: usize },
    NoChange,
}

pub struct AdaptiveTuner {
    config: ConfigHandle,
    metrics: Arc<EngineMetrics>,
    limits: TunerLimits,
    /// Values to relax back toward.
    baseline: EngineConfig,
    healthy_streak: u32,
}

impl AdaptiveTuner {
    pub fn new(config: ConfigHandle, metrics: Arc<EngineMetrics>, limits: TunerLimits) -> Self {
        let baseline = config.get();
        AdaptiveTuner {
            config,
            metrics,
            limits,
            baseline,
            healthy_streak: 0,
        }
    }

    /// Inspect current metrics and adjust. Idempotent: a second tick on
    /// the same conditions makes no further change.
    pub fn tick(&mut self) -> TuningAction {
        let snapshot = self.metrics.snapshot();
        self.apply(&snapshot)
    }

    fn apply(&mut self, snapshot: &MetricsSnapshot) -> TuningAction {
        let current = self.config.get();
        let budget = current.max_processing_time;

        if snapshot.events_processed > 0 && snapshot.p99_latency > budget {
            self.healthy_streak = 0;
            let new_batch_size = (current.batch_size / 2).max(self.limits.min_batch_size);
            if new_batch_size == current.batch_size && !current.fast_path_enabled {
                return TuningAction::NoChange;
            }
            let applied = self.config.update(|config| {
                config.batch_size = new_batch_size;
                // Chunks may never exceed the batch they are cut from.
                config.chunk_size = config.chunk_size.min(new_batch_size);
                config.fast_path_enabled = false;
            });
            if applied.is_err() {
                return TuningAction::NoChange;
            }
            info!(
                p99_ms = snapshot.p99_latency.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                new_batch_size,
                "latency over budget, tightening"
            );
            return TuningAction::Tightened { new_batch_size };
        }

        let observed_enough = snapshot.cache_hits + snapshot.cache_misses >= 100;
        if observed_enough
            && snapshot.cache_hit_ratio < self.limits.low_hit_ratio
            && current.cache_ttl < self.limits.max_cache_ttl
        {
            let new_ttl = Duration::from_secs(
                ((current.cache_ttl.as_secs() * 3) / 2).max(1),
            )
            .min(self.limits.max_cache_ttl);
            if self.config.update(|config| config.cache_ttl = new_ttl).is_err() {
                return TuningAction::NoChange;
            }
            info!(
                hit_ratio = snapshot.cache_hit_ratio,
                new_ttl_secs = new_ttl.as_secs(),
                "low cache hit ratio, raising ttl"
            );
            return TuningAction::RaisedCacheTtl { new_ttl };
        }

        // Healthy when p99 sits comfortably inside the budget.
        let healthy = snapshot.p99_latency <= budget / 2;
        if healthy {
            self.healthy_streak = self.healthy_streak.saturating_add(1);
        } else {
            self.healthy_streak = 0;
        }

        if self.healthy_streak >= self.limits.healthy_ticks_to_relax {
            let target = self.baseline.batch_size.min(self.limits.max_batch_size);
            let already_relaxed = current.batch_size == target
                && current.fast_path_enabled == self.baseline.fast_path_enabled
                && current.cache_ttl == self.baseline.cache_ttl;
            if already_relaxed {
                return TuningAction::NoChange;
            }
            // Step batch size halfway back, restore flags directly.
            let new_batch_size = current
                .batch_size
                .saturating_add(target.saturating_sub(current.batch_size).div_ceil(2))
                .clamp(self.limits.min_batch_size, self.limits.max_batch_size);
            let baseline_fast_path = self.baseline.fast_path_enabled;
            let baseline_ttl = self.baseline.cache_ttl;
            let baseline_chunk = self.baseline.chunk_size;
            let applied = self.config.update(|config| {
                config.batch_size = new_batch_size;
                config.chunk_size = baseline_chunk.min(new_batch_size);
                config.fast_path_enabled = baseline_fast_path;
                config.cache_ttl = baseline_ttl;
            });
            if applied.is_err() {
                return TuningAction::NoChange;
            }
            info!(new_batch_size, "metrics healthy, relaxing constraints");
            return TuningAction::Relaxed { new_batch_size };
        }

        TuningAction::NoChange
    }
}

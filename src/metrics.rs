//! Engine metrics collection.
//!
//! Counters are lock-free atomics updated on the hot path; latency samples
//! go into a bounded history guarded by a mutex, from which percentiles are
//! computed on demand. A snapshot is internally consistent enough for
//! operational monitoring, not a transactional view.

use crate::breaker::BreakerState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const LATENCY_HISTORY_SIZE: usize = 1000;

/// Shared metrics for a running engine.
pub struct EngineMetrics {
    /// Events accepted for evaluation
    events_processed: AtomicU64,
    /// Events rejected at intake (validation or overload)
    events_rejected: AtomicU64,
    /// Rule evaluations that produced a match
    matches_detected: AtomicU64,
    /// Evaluations that ended in an error status
    evaluation_errors: AtomicU64,
    /// Evaluations cut off at the deadline
    evaluation_timeouts: AtomicU64,
    /// Result cache hits
    cache_hits: AtomicU64,
    /// Result cache misses
    cache_misses: AtomicU64,
    /// Matches dropped because the emit queue was full
    emits_dropped: AtomicU64,
    /// Circuit breaker state transitions
    breaker_transitions: AtomicU64,
    /// Current intake buffer depth
    intake_depth: AtomicUsize,
    /// Current emit queue depth
    emit_depth: AtomicUsize,
    /// Current breaker state, encoded for the gauge
    breaker_state: AtomicUsize,
    /// Per-event latency history, bounded
    latencies: Mutex<VecDeque<Duration>>,
    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics {
            events_processed: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            matches_detected: AtomicU64::new(0),
            evaluation_errors: AtomicU64::new(0),
            evaluation_timeouts: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            emits_dropped: AtomicU64::new(0),
            breaker_transitions: AtomicU64::new(0),
            intake_depth: AtomicUsize::new(0),
            emit_depth: AtomicUsize::new(0),
            breaker_state: AtomicUsize::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_HISTORY_SIZE)),
            start_time: Instant::now(),
        }
    }

    pub fn record_event(&self, latency: Duration) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        let mut latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
        if latencies.len() == LATENCY_HISTORY_SIZE {
            latencies.pop_front();
        }
        latencies.push_back(latency);
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.evaluation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.evaluation_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emit_dropped(&self) {
        self.emits_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Mirror the breaker's current state and lifetime transition count
    /// into the gauge pair; called whenever a snapshot is taken.
    pub fn set_breaker(&self, state: BreakerState, transitions: u64) {
        self.breaker_transitions.store(transitions, Ordering::Relaxed);
        let encoded = match state {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        };
        self.breaker_state.store(encoded, Ordering::Relaxed);
    }

    pub fn set_intake_depth(&self, depth: usize) {
        self.intake_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_emit_depth(&self, depth: usize) {
        self.emit_depth.store(depth, Ordering::Relaxed);
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.cache_misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Latency at the given percentile over the recent history.
    pub fn latency_percentile(&self, percentile: f64) -> Duration {
        let latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
        if latencies.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = latencies.iter().copied().collect();
        sorted.sort();
        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            matches_detected: self.matches_detected.load(Ordering::Relaxed),
            evaluation_errors: self.evaluation_errors.load(Ordering::Relaxed),
            evaluation_timeouts: self.evaluation_timeouts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_ratio: self.cache_hit_ratio(),
            emits_dropped: self.emits_dropped.load(Ordering::Relaxed),
            breaker_transitions: self.breaker_transitions.load(Ordering::Relaxed),
            breaker_state: match self.breaker_state.load(Ordering::Relaxed) {
                1 => BreakerState::Open,
                2 => BreakerState::HalfOpen,
                _ => BreakerState::Closed,
            },
            intake_depth: self.intake_depth.load(Ordering::Relaxed),
            emit_depth: self.emit_depth.load(Ordering::Relaxed),
            p50_latency: self.latency_percentile(0.50),
            p95_latency: self.latency_percentile(0.95),
            p99_latency: self.latency_percentile(0.99),
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the engine's counters and gauges.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub events_rejected: u64,
    pub matches_detected: u64,
    pub evaluation_errors: u64,
    pub evaluation_timeouts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub emits_dropped: u64,
    pub breaker_transitions: u64,
    pub breaker_state: BreakerState,
    pub intake_depth: usize,
    pub emit_depth: usize,
    pub p50_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Plain-text exposition, one `name value` line per metric.
    pub fn render_text(&self) -> String {
        let mut out = String::with_capacity(512);
        let mut line = |name: &str, value: String| {
            out.push_str(name);
            out.push(' ');
            out.push_str(&value);
            out.push('\n');
        };
        line("events_processed_total", self.events_processed.to_string());
        line("events_rejected_total", self.events_rejected.to_string());
        line("matches_detected_total", self.matches_detected.to_string());
        line("evaluation_errors_total", self.evaluation_errors.to_string());
        line(
            "evaluation_timeouts_total",
            self.evaluation_timeouts.to_string(),
        );
        line("cache_hits_total", self.cache_hits.to_string());
        line("cache_misses_total", self.cache_misses.to_string());
        line("cache_hit_ratio", format!("{:.4}", self.cache_hit_ratio));
        line("emits_dropped_total", self.emits_dropped.to_string());
        line(
            "breaker_transitions_total",
            self.breaker_transitions.to_string(),
        );
        line("breaker_state", self.breaker_state.as_str().to_string());
        line("intake_queue_depth", self.intake_depth.to_string());
        line("emit_queue_depth", self.emit_depth.to_string());
        line(
            "latency_p50_ms",
            format!("{:.3}", self.p50_latency.as_secs_f64() * 1000.0),
        );
        line(
            "latency_p95_ms",
            format!("{:.3}", self.p95_latency.as_secs_f64() * 1000.0),
        );
        line(
            "latency_p99_ms",
            format!("{:.3}", self.p99_latency.as_secs_f64() * 1000.0),
        );
        line(
            "uptime_seconds",
            format!("{:.1}", self.uptime.as_secs_f64()),
        );
        out
    }
}

//! The correlation engine: wiring, admission control, and dispatch.
//!
//! The engine owns no global state; store, baseline source, rules, and
//! match consumers are injected at construction and the caller owns the
//! lifecycle. A single event flows validation → breaker admission →
//! concurrency guard → index narrowing → per-rule cache or strategy
//! evaluation → match emission, with metrics recorded along the way.

use crate::breaker::{BreakerSettings, BreakerState, CircuitBreaker};
use crate::cache::ResultCache;
use crate::config::{ConfigHandle, EngineConfig};
use crate::emit::{MatchConsumer, MatchDispatcher, MatchPayload};
use crate::error::{EngineError, Result};
use crate::eval::{self, regex_cache::RegexCache, EvalContext, EvalStatus, EvaluationResult};
use crate::event::Event;
use crate::intake::{self, BatchBuffer, BatchOutcome, ChunkStats};
use crate::metrics::EngineMetrics;
use crate::rules::index::RuleIndex;
use crate::rules::prefilter::LiteralPrefilter;
use crate::rules::CorrelationRule;
use crate::store::{BaselineStore, CorrelationStore};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of handing one event to the engine.
#[derive(Debug)]
pub enum EventOutcome {
    /// Every candidate rule was evaluated.
    Evaluated(Vec<EvaluationResult>),
    /// Accepted into the batch buffer for a later flush.
    Buffered,
    /// Rejected by the open circuit breaker.
    Rejected,
    /// Rejected because too many events are already in flight.
    Overloaded,
    /// Failed ingest validation.
    Invalid(String),
}

pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn CorrelationStore>>,
    baselines: Option<Arc<dyn BaselineStore>>,
    rules: Vec<CorrelationRule>,
    consumers: Vec<Arc<dyn MatchConsumer>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            store: None,
            baselines: None,
            rules: Vec::new(),
            consumers: Vec::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn CorrelationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn baselines(mut self, baselines: Arc<dyn BaselineStore>) -> Self {
        self.baselines = Some(baselines);
        self
    }

    pub fn rules(mut self, rules: Vec<CorrelationRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn MatchConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn build(self) -> Result<CorrelationEngine> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| EngineError::ConfigError("correlation store is required".to_string()))?;
        let baselines = self.baselines.ok_or_else(|| {
            EngineError::ConfigError("baseline store is required".to_string())
        })?;

        let breaker = CircuitBreaker::new(BreakerSettings {
            failure_threshold: self.config.breaker_threshold,
            cool_off: self.config.breaker_timeout,
            window: self.config.breaker_window,
            half_open_trials: self.config.breaker_half_open_trials,
        });
        let dispatcher = MatchDispatcher::new(self.config.emit_queue_capacity, self.consumers);

        let index = RuleIndex::new(self.rules);
        let all = index.all_rules();
        let prefilter = LiteralPrefilter::from_rules(&all);
        let has_stateless = all.iter().any(|rule| rule.is_stateless());
        info!(
            rules = all.len(),
            prefilter_patterns = prefilter.pattern_count(),
            prefilter_strategy = prefilter.strategy_name(),
            "engine built"
        );

        Ok(CorrelationEngine {
            config: ConfigHandle::new(self.config),
            index,
            prefilter: RwLock::new(Arc::new(prefilter)),
            has_stateless: AtomicBool::new(has_stateless),
            cache: Arc::new(ResultCache::new()),
            store,
            baselines,
            regexes: RegexCache::new(),
            breaker,
            metrics: Arc::new(EngineMetrics::new()),
            dispatcher,
            buffer: BatchBuffer::new(),
            in_flight: AtomicUsize::new(0),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CorrelationEngine {
    config: ConfigHandle,
    index: RuleIndex,
    prefilter: RwLock<Arc<LiteralPrefilter>>,
    has_stateless: AtomicBool,
    cache: Arc<ResultCache>,
    store: Arc<dyn CorrelationStore>,
    baselines: Arc<dyn BaselineStore>,
    regexes: RegexCache,
    breaker: CircuitBreaker,
    metrics: Arc<EngineMetrics>,
    dispatcher: MatchDispatcher,
    buffer: BatchBuffer,
    in_flight: AtomicUsize,
}

impl CorrelationEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Accept one event: fast path when eligible, otherwise buffer it and
    /// flush if a trigger fired.
    pub fn submit(&self, event: Event) -> Result<EventOutcome> {
        if let Err(err) = event.validate() {
            self.metrics.record_rejected();
            return Ok(EventOutcome::Invalid(err.to_string()));
        }

        let config = self.config.get();
        let fast_path = config.fast_path_enabled
            && self.has_stateless.load(Ordering::Relaxed)
            && (!config.circuit_breaker_enabled || self.breaker.state() == BreakerState::Closed);
        if fast_path {
            return self.process_event(event);
        }

        let depth = self.buffer.push(event);
        self.metrics.set_intake_depth(depth);
        if self.buffer.should_flush(config.batch_size, config.flush_interval) {
            let _ = self.flush();
        }
        Ok(EventOutcome::Buffered)
    }

    /// Evaluate one event synchronously against every applicable rule.
    pub fn process_event(&self, event: Event) -> Result<EventOutcome> {
        if let Err(err) = event.validate() {
            self.metrics.record_rejected();
            return Ok(EventOutcome::Invalid(err.to_string()));
        }

        let config = self.config.get();
        if config.circuit_breaker_enabled && !self.breaker.try_acquire() {
            self.metrics.record_rejected();
            debug!(event_id = %event.id, "rejected, circuit breaker open");
            return Ok(EventOutcome::Rejected);
        }

        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= config.max_concurrent_events {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.metrics.record_rejected();
            if config.circuit_breaker_enabled {
                // Overload is an explicit failure signal for the breaker.
                self.breaker.record_failure();
            }
            warn!(event_id = %event.id, "too many events in flight");
            return Ok(EventOutcome::Overloaded);
        }

        let start = Instant::now();
        let candidates = self.index.applicable_rules(&event);
        let mut infra_failure = false;
        let results = self.evaluate_event(&event, &config, &candidates, &mut infra_failure);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        if config.circuit_breaker_enabled {
            if infra_failure {
                self.breaker.record_failure();
            } else {
                self.breaker.record_success();
            }
        }

        for result in results.iter().filter(|r| r.matched) {
            self.metrics.record_match();
            let rule_name = candidates
                .iter()
                .find(|rule| rule.id == result.rule_id)
                .map(|rule| rule.name.clone())
                .unwrap_or_default();
            let delivered = self.dispatcher.dispatch(MatchPayload {
                rule_id: result.rule_id.clone(),
                rule_name,
                event: event.clone(),
                result: result.clone(),
            });
            if !delivered {
                self.metrics.record_emit_dropped();
            }
        }
        self.metrics.set_emit_depth(self.dispatcher.queue_depth());
        self.metrics.record_event(start.elapsed());

        Ok(EventOutcome::Evaluated(results))
    }

    fn evaluate_event(
        &self,
        event: &Event,
        config: &EngineConfig,
        candidates: &[Arc<CorrelationRule>],
        infra_failure: &mut bool,
    ) -> Vec<EvaluationResult> {
        let start = Instant::now();
        let budget = config.max_processing_time;
        let prefilter = Arc::clone(&self.prefilter.read().unwrap_or_else(|e| e.into_inner()));
        let prefilter_passed = prefilter.matches(event);
        let ctx = EvalContext {
            store: self.store.as_ref(),
            baselines: self.baselines.as_ref(),
            regexes: &self.regexes,
        };

        let mut results = Vec::with_capacity(candidates.len());
        for rule in candidates {
            // Deadline is checked between rules, not inside one. A rule
            // already running finishes even past the budget, so a single
            // slow evaluation can overrun it.
            if start.elapsed() >= budget {
                self.metrics.record_timeout();
                results.push(EvaluationResult::timeout(&rule.id, start.elapsed()));
                continue;
            }

            if !prefilter_passed && prefilter.covers(&rule.id) {
                // None of the rule's literals occur anywhere in the event.
                results.push(EvaluationResult::no_match(&rule.id));
                continue;
            }

            if rule.is_stateless() {
                let fingerprint = event.fingerprint(&rule.referenced_fields());
                if let Some(cached) = self.cache.get(&rule.id, fingerprint) {
                    self.metrics.record_cache_hit();
                    results.push(cached);
                    continue;
                }
                self.metrics.record_cache_miss();
                match eval::evaluate(&rule, event, &ctx) {
                    Ok(result) => {
                        self.cache
                            .insert(&rule.id, fingerprint, result.clone(), config.cache_ttl);
                        results.push(result);
                    }
                    Err(err) => {
                        self.metrics.record_error();
                        results.push(EvaluationResult::error(&rule.id, err.to_string()));
                    }
                }
                continue;
            }

            match eval::evaluate(&rule, event, &ctx) {
                Ok(result) => {
                    if result.status == EvalStatus::Error {
                        self.metrics.record_error();
                    }
                    results.push(result);
                }
                Err(err @ (EngineError::StoreUnavailable | EngineError::StoreError(_))) => {
                    // Degraded mode: stateless rules keep working, this
                    // rule short-circuits to a flagged non-match.
                    *infra_failure = true;
                    self.metrics.record_error();
                    warn!(rule_id = %rule.id, %err, "store failure, degraded to stateless mode");
                    results.push(
                        EvaluationResult::error(&rule.id, err.to_string())
                            .with_metadata("store_unavailable", serde_json::Value::Bool(true)),
                    );
                }
                Err(err) => {
                    *infra_failure = true;
                    self.metrics.record_error();
                    results.push(EvaluationResult::error(&rule.id, err.to_string()));
                }
            }
        }
        results
    }

    /// Evaluate a batch directly, split into chunks with isolated
    /// failures.
    pub fn process_batch(&self, mut events: Vec<Event>) -> BatchOutcome {
        let config = self.config.get();
        if config.priority_queue_enabled {
            intake::order_by_priority(&mut events);
        }
        let chunks = intake::chunk_events(events, config.chunk_size);

        let stats: Vec<ChunkStats> = if config.parallel_evaluation && chunks.len() > 1 {
            chunks
                .into_par_iter()
                .enumerate()
                .map(|(index, chunk)| self.process_chunk(index, chunk))
                .collect()
        } else {
            chunks
                .into_iter()
                .enumerate()
                .map(|(index, chunk)| self.process_chunk(index, chunk))
                .collect()
        };
        BatchOutcome::merge(stats)
    }

    fn process_chunk(&self, index: usize, chunk: Vec<Event>) -> ChunkStats {
        let start = Instant::now();
        let mut processed = 0;
        let mut failed = 0;
        for event in chunk {
            match self.process_event(event) {
                Ok(EventOutcome::Evaluated(_)) => processed += 1,
                Ok(_) => failed += 1,
                Err(err) => {
                    warn!(chunk = index, %err, "event failed in chunk");
                    failed += 1;
                }
            }
        }
        ChunkStats {
            index,
            processed,
            failed,
            duration: start.elapsed(),
        }
    }

    /// Periodic upkeep, meant to be driven on a timer by the embedding
    /// runtime. Flushes the batch buffer once the flush interval has
    /// elapsed (covering buffered events when `submit` traffic stops,
    /// since `submit` only re-checks the triggers on arrival), purges
    /// expired result-cache entries, and lets the store reclaim expired
    /// keys.
    pub fn run_maintenance(&self) -> Option<BatchOutcome> {
        self.cache.sweep();
        self.store.maintain();
        let config = self.config.get();
        if self
            .buffer
            .should_flush(config.batch_size, config.flush_interval)
        {
            return self.flush();
        }
        None
    }

    /// Flush the batch buffer if a flush is not already running.
    pub fn flush(&self) -> Option<BatchOutcome> {
        let events = self.buffer.drain()?;
        self.metrics.set_intake_depth(self.buffer.len());
        let outcome = self.process_batch(events);
        debug!(
            processed = outcome.processed,
            failed = outcome.failed,
            chunks = outcome.chunks.len(),
            "batch flushed"
        );
        Some(outcome)
    }

    /// Replace the rule set without downtime. In-flight lookups finish on
    /// the old generation; the result cache is cleared because cached
    /// outcomes may belong to rules that changed.
    pub fn reload_rules(&self, rules: Vec<CorrelationRule>) {
        self.index.reload(rules);
        let all = self.index.all_rules();
        let prefilter = LiteralPrefilter::from_rules(&all);
        self.has_stateless
            .store(all.iter().any(|rule| rule.is_stateless()), Ordering::Relaxed);
        *self.prefilter.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(prefilter);
        self.cache.clear();
        info!(rules = all.len(), "rules reloaded");
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn rule_count(&self) -> usize {
        self.index.rule_count()
    }

    /// Metrics snapshot with queue and breaker gauges refreshed.
    pub fn metrics_snapshot(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.set_intake_depth(self.buffer.len());
        self.metrics.set_emit_depth(self.dispatcher.queue_depth());
        self.metrics
            .set_breaker(self.breaker.state(), self.breaker.transition_count());
        self.metrics.snapshot()
    }

    /// Plain-text metrics exposition for scraping.
    pub fn render_metrics(&self) -> String {
        self.metrics_snapshot().render_text()
    }

    /// Drain outstanding work: flush the buffer and stop the dispatcher.
    pub fn shutdown(&mut self) {
        let _ = self.flush();
        self.dispatcher.shutdown();
        info!("engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{
        Combinator, Condition, ConditionOperator, RuleLogic, SimpleLogic, ThresholdLogic,
    };
    use crate::store::{MemoryBaselineStore, MemoryStore, UnavailableStore};
    use serde_json::json;
    use std::time::Duration;

    fn simple_rule(id: &str, event_type: &str) -> CorrelationRule {
        CorrelationRule {
            id: id.to_string(),
            name: format!("{id} name"),
            enabled: true,
            window_minutes: 5,
            logic: RuleLogic::Simple(SimpleLogic {
                conditions: vec![Condition {
                    field: "event_type".to_string(),
                    operator: ConditionOperator::Equals,
                    value: json!(event_type),
                    case_sensitive: false,
                }],
                combinator: Combinator::And,
            }),
        }
    }

    fn threshold_rule(id: &str, count: u64) -> CorrelationRule {
        CorrelationRule {
            id: id.to_string(),
            name: String::new(),
            enabled: true,
            window_minutes: 5,
            logic: RuleLogic::Threshold(ThresholdLogic {
                count_threshold: count,
                group_by: vec!["source_ip".to_string()],
            }),
        }
    }

    fn engine_with(rules: Vec<CorrelationRule>) -> CorrelationEngine {
        CorrelationEngine::builder()
            .store(Arc::new(MemoryStore::new()))
            .baselines(Arc::new(MemoryBaselineStore::new()))
            .rules(rules)
            .build()
            .unwrap()
    }

    fn results(outcome: EventOutcome) -> Vec<EvaluationResult> {
        match outcome {
            EventOutcome::Evaluated(results) => results,
            other => panic!("expected evaluation, got {other:?}"),
        }
    }

    #[test]
    fn test_process_event_matches_simple_rule() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        let event = Event::new("e1", "auth_failure", "fw");
        let results = results(engine.process_event(event).unwrap());
        assert_eq!(results.len(), 1);
        assert!(results[0].matched);
        assert_eq!(engine.metrics_snapshot().matches_detected, 1);
    }

    #[test]
    fn test_invalid_event_rejected_before_engine() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        let mut event = Event::new("e1", "auth_failure", "fw");
        event.id.clear();
        match engine.process_event(event).unwrap() {
            EventOutcome::Invalid(_) => {}
            other => panic!("expected invalid, got {other:?}"),
        }
        assert_eq!(engine.metrics_snapshot().events_rejected, 1);
    }

    #[test]
    fn test_cache_hit_on_second_identical_event() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        let first = Event::new("e1", "auth_failure", "fw");
        let second = Event::new("e2", "auth_failure", "fw");
        engine.process_event(first).unwrap();
        let second_results = results(engine.process_event(second).unwrap());
        assert!(second_results[0].matched);
        let snapshot = engine.metrics_snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[test]
    fn test_store_failure_degrades_and_flags() {
        let engine = CorrelationEngine::builder()
            .store(Arc::new(UnavailableStore))
            .baselines(Arc::new(MemoryBaselineStore::new()))
            .rules(vec![simple_rule("simple", "auth_failure"), threshold_rule("thr", 3)])
            .build()
            .unwrap();
        let event = Event::new("e1", "auth_failure", "fw")
            .with_field("source_ip", json!("10.0.0.1"));
        let results = results(engine.process_event(event).unwrap());

        let simple = results.iter().find(|r| r.rule_id == "simple").unwrap();
        assert!(simple.matched);
        let threshold = results.iter().find(|r| r.rule_id == "thr").unwrap();
        assert!(!threshold.matched);
        assert_eq!(threshold.status, EvalStatus::Error);
        assert_eq!(threshold.metadata["store_unavailable"], json!(true));
    }

    #[test]
    fn test_breaker_opens_after_repeated_store_failures() {
        let mut config = EngineConfig::default();
        config.breaker_threshold = 3;
        let engine = CorrelationEngine::builder()
            .config(config)
            .store(Arc::new(UnavailableStore))
            .baselines(Arc::new(MemoryBaselineStore::new()))
            .rules(vec![threshold_rule("thr", 3)])
            .build()
            .unwrap();

        for i in 0..3 {
            let event = Event::new(format!("e{i}"), "auth_failure", "fw")
                .with_field("source_ip", json!("10.0.0.1"));
            engine.process_event(event).unwrap();
        }
        assert_eq!(engine.breaker_state(), BreakerState::Open);

        // The snapshot reports the breaker, not a stale gauge.
        let snapshot = engine.metrics_snapshot();
        assert_eq!(snapshot.breaker_state, BreakerState::Open);
        assert_eq!(snapshot.breaker_transitions, 1);
        assert!(engine.render_metrics().contains("breaker_state open"));

        let event = Event::new("e9", "auth_failure", "fw")
            .with_field("source_ip", json!("10.0.0.1"));
        match engine.process_event(event).unwrap() {
            EventOutcome::Rejected => {}
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_processing_counts_chunks() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        let events: Vec<Event> = (0..10)
            .map(|i| Event::new(format!("e{i}"), "auth_failure", "fw"))
            .collect();
        let outcome = engine.process_batch(events);
        assert_eq!(outcome.processed, 10);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.chunks.is_empty());
    }

    #[test]
    fn test_submit_buffers_when_fast_path_disabled() {
        let mut config = EngineConfig::default();
        config.fast_path_enabled = false;
        config.batch_size = 100;
        let engine = CorrelationEngine::builder()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .baselines(Arc::new(MemoryBaselineStore::new()))
            .rules(vec![simple_rule("r1", "auth_failure")])
            .build()
            .unwrap();

        match engine.submit(Event::new("e1", "auth_failure", "fw")).unwrap() {
            EventOutcome::Buffered => {}
            other => panic!("expected buffering, got {other:?}"),
        }
        assert_eq!(engine.metrics_snapshot().intake_depth, 1);
        let outcome = engine.flush().unwrap();
        assert_eq!(outcome.processed, 1);
    }

    #[test]
    fn test_maintenance_flushes_idle_buffer_on_timer() {
        let mut config = EngineConfig::default();
        config.fast_path_enabled = false;
        config.flush_interval = Duration::from_millis(20);
        let engine = CorrelationEngine::builder()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .baselines(Arc::new(MemoryBaselineStore::new()))
            .rules(vec![simple_rule("r1", "auth_failure")])
            .build()
            .unwrap();

        engine.submit(Event::new("e1", "auth_failure", "fw")).unwrap();
        // No further traffic arrives; only maintenance can flush now.
        assert_eq!(engine.metrics_snapshot().events_processed, 0);
        std::thread::sleep(Duration::from_millis(40));
        let outcome = engine.run_maintenance().unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(engine.metrics_snapshot().intake_depth, 0);
        assert!(engine.run_maintenance().is_none());
    }

    #[test]
    fn test_maintenance_sweeps_expired_cache_entries() {
        let mut config = EngineConfig::default();
        config.cache_ttl = Duration::from_millis(10);
        let engine = CorrelationEngine::builder()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .baselines(Arc::new(MemoryBaselineStore::new()))
            .rules(vec![simple_rule("r1", "auth_failure")])
            .build()
            .unwrap();

        engine.process_event(Event::new("e1", "auth_failure", "fw")).unwrap();
        assert!(!engine.cache().is_empty());
        std::thread::sleep(Duration::from_millis(25));
        engine.run_maintenance();
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_submit_fast_path_evaluates_inline() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        match engine.submit(Event::new("e1", "auth_failure", "fw")).unwrap() {
            EventOutcome::Evaluated(results) => assert!(results[0].matched),
            other => panic!("expected inline evaluation, got {other:?}"),
        }
    }

    #[test]
    fn test_reload_swaps_rules_and_clears_cache() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        engine.process_event(Event::new("e1", "auth_failure", "fw")).unwrap();
        assert!(!engine.cache().is_empty());

        engine.reload_rules(vec![simple_rule("r2", "process_start")]);
        assert!(engine.cache().is_empty());
        assert_eq!(engine.rule_count(), 1);
        let results = results(
            engine
                .process_event(Event::new("e2", "process_start", "edr"))
                .unwrap(),
        );
        assert_eq!(results[0].rule_id, "r2");
    }

    #[test]
    fn test_threshold_match_through_engine() {
        let engine = engine_with(vec![threshold_rule("thr", 3)]);
        let mut matched = false;
        for i in 0..3 {
            let event = Event::new(format!("e{i}"), "auth_failure", "fw")
                .with_field("source_ip", json!("10.0.0.1"));
            let results = results(engine.process_event(event).unwrap());
            matched = results[0].matched;
        }
        assert!(matched);
    }

    #[test]
    fn test_render_metrics_exposition() {
        let engine = engine_with(vec![simple_rule("r1", "auth_failure")]);
        engine.process_event(Event::new("e1", "auth_failure", "fw")).unwrap();
        let text = engine.render_metrics();
        assert!(text.contains("events_processed_total 1"));
        assert!(text.contains("breaker_state closed"));
    }
}

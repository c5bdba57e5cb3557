//! Engine-level integration tests: admission control, caching, batching,
//! and recovery behavior wired through the public API.

use correlation_engine::engine::{CorrelationEngine, EventOutcome};
use correlation_engine::error::{EngineError, Result};
use correlation_engine::event::Event;
use correlation_engine::rules::{
    Combinator, Condition, ConditionOperator, CorrelationRule, RuleLogic, SimpleLogic,
    ThresholdLogic,
};
use correlation_engine::store::{CorrelationStore, MemoryBaselineStore, MemoryStore};
use correlation_engine::{BreakerState, EngineConfig, EvaluationResult, MatchConsumer, MatchPayload};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Delegates to an in-memory store until flipped into failure mode.
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        FlakyStore {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(EngineError::StoreUnavailable)
        } else {
            Ok(())
        }
    }
}

impl CorrelationStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key)
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.set_with_ttl(key, value, ttl)
    }

    fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.check()?;
        self.inner.incr_with_ttl(key, ttl)
    }

    fn append_with_ttl(&self, key: &str, item: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.inner.append_with_ttl(key, item, ttl)
    }

    fn list_range(&self, key: &str, start: usize, end: usize) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_range(key, start, end)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.check()?;
        self.inner.compare_and_swap(key, expected, new, ttl)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(key)
    }
}

struct CountingConsumer {
    matches: AtomicUsize,
    names: Mutex<Vec<String>>,
}

impl MatchConsumer for CountingConsumer {
    fn handle(&self, payload: &MatchPayload) {
        self.matches.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(payload.rule_name.clone());
    }
}

fn simple_rule(id: &str, event_type: &str) -> CorrelationRule {
    CorrelationRule {
        id: id.to_string(),
        name: String::new(),
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

fn evaluated(outcome: EventOutcome) -> Vec<EvaluationResult> {
    match outcome {
        EventOutcome::Evaluated(results) => results,
        other => panic!("expected evaluation, got {other:?}"),
    }
}

#[test]
fn test_breaker_full_cycle_open_half_open_closed() {
    let store = Arc::new(FlakyStore::new());
    let mut config = EngineConfig::default();
    config.breaker_threshold = 3;
    config.breaker_timeout = Duration::from_millis(50);
    config.breaker_half_open_trials = 1;

    let engine = CorrelationEngine::builder()
        .config(config)
        .store(store.clone())
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![threshold_rule("thr", 3)])
        .build()
        .unwrap();

    let event = |id: &str| {
        Event::new(id, "auth_failure", "fw").with_field("source_ip", json!("10.0.0.1"))
    };

    store.set_failing(true);
    for i in 0..3 {
        evaluated(engine.process_event(event(&format!("e{i}"))).unwrap());
    }
    assert_eq!(engine.breaker_state(), BreakerState::Open);

    // OPEN rejects outright, no evaluation happens.
    match engine.process_event(event("rejected")).unwrap() {
        EventOutcome::Rejected => {}
        other => panic!("expected rejection, got {other:?}"),
    }

    // After the cool-off, one trial runs against the recovered store.
    std::thread::sleep(Duration::from_millis(70));
    store.set_failing(false);
    let results = evaluated(engine.process_event(event("trial")).unwrap());
    assert_eq!(results.len(), 1);
    assert_eq!(engine.breaker_state(), BreakerState::Closed);

    // Counters were reset; normal traffic flows again.
    evaluated(engine.process_event(event("normal")).unwrap());
}

#[test]
fn test_half_open_failure_reopens_breaker() {
    let store = Arc::new(FlakyStore::new());
    let mut config = EngineConfig::default();
    config.breaker_threshold = 2;
    config.breaker_timeout = Duration::from_millis(40);
    config.breaker_half_open_trials = 1;

    let engine = CorrelationEngine::builder()
        .config(config)
        .store(store.clone())
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![threshold_rule("thr", 3)])
        .build()
        .unwrap();

    store.set_failing(true);
    for i in 0..2 {
        let event = Event::new(format!("e{i}"), "auth_failure", "fw")
            .with_field("source_ip", json!("1.1.1.1"));
        engine.process_event(event).unwrap();
    }
    assert_eq!(engine.breaker_state(), BreakerState::Open);

    std::thread::sleep(Duration::from_millis(60));
    // Store still down; the trial fails and the breaker reopens.
    let trial = Event::new("trial", "auth_failure", "fw")
        .with_field("source_ip", json!("1.1.1.1"));
    engine.process_event(trial).unwrap();
    assert_eq!(engine.breaker_state(), BreakerState::Open);
}

#[test]
fn test_cache_expiry_forces_reevaluation() {
    let mut config = EngineConfig::default();
    config.cache_ttl = Duration::from_millis(40);

    let engine = CorrelationEngine::builder()
        .config(config)
        .store(Arc::new(MemoryStore::new()))
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![simple_rule("r1", "auth_failure")])
        .build()
        .unwrap();

    let event = |id: &str| Event::new(id, "auth_failure", "fw");
    engine.process_event(event("e1")).unwrap();
    engine.process_event(event("e2")).unwrap();
    let warm = engine.metrics_snapshot();
    assert_eq!(warm.cache_hits, 1);
    assert_eq!(warm.cache_misses, 1);

    std::thread::sleep(Duration::from_millis(60));
    engine.process_event(event("e3")).unwrap();
    let cold = engine.metrics_snapshot();
    assert_eq!(cold.cache_hits, 1);
    assert_eq!(cold.cache_misses, 2);
}

#[test]
fn test_unindexed_event_yields_empty_result_set() {
    let engine = CorrelationEngine::builder()
        .store(Arc::new(MemoryStore::new()))
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![
            simple_rule("a", "auth_failure"),
            simple_rule("b", "process_start"),
        ])
        .build()
        .unwrap();

    let results = evaluated(
        engine
            .process_event(Event::new("e1", "totally_unknown", "src"))
            .unwrap(),
    );
    assert!(results.is_empty());
}

#[test]
fn test_matches_reach_consumers() {
    let consumer = Arc::new(CountingConsumer {
        matches: AtomicUsize::new(0),
        names: Mutex::new(Vec::new()),
    });
    let mut rule = simple_rule("r1", "auth_failure");
    rule.name = "Failed authentication".to_string();
    let mut engine = CorrelationEngine::builder()
        .store(Arc::new(MemoryStore::new()))
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![rule])
        .consumer(consumer.clone())
        .build()
        .unwrap();

    for i in 0..5 {
        engine
            .process_event(Event::new(format!("e{i}"), "auth_failure", "fw"))
            .unwrap();
    }
    engine.shutdown();
    assert_eq!(consumer.matches.load(Ordering::SeqCst), 5);
    let names = consumer.names.lock().unwrap();
    assert!(names.iter().all(|name| name == "Failed authentication"));
}

#[test]
fn test_batch_chunking_and_priority() {
    let mut config = EngineConfig::default();
    config.chunk_size = 4;

    let engine = CorrelationEngine::builder()
        .config(config)
        .store(Arc::new(MemoryStore::new()))
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![simple_rule("r1", "auth_failure")])
        .build()
        .unwrap();

    let mut events: Vec<Event> = (0..9)
        .map(|i| Event::new(format!("e{i}"), "auth_failure", "fw"))
        .collect();
    events.push(
        Event::new("urgent", "auth_failure", "fw").with_field("severity", json!("critical")),
    );

    let outcome = engine.process_batch(events);
    assert_eq!(outcome.processed, 10);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.chunks.len(), 3);
    assert_eq!(outcome.chunks.iter().map(|c| c.processed).sum::<usize>(), 10);
}

#[test]
fn test_buffered_submit_flushes_at_batch_size() {
    let mut config = EngineConfig::default();
    config.fast_path_enabled = false;
    config.batch_size = 5;
    config.chunk_size = 5;
    // Keeps the timer trigger out of the picture; only size should flush.
    config.flush_interval = Duration::from_secs(3600);

    let engine = CorrelationEngine::builder()
        .config(config)
        .store(Arc::new(MemoryStore::new()))
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![simple_rule("r1", "auth_failure")])
        .build()
        .unwrap();

    for i in 0..5 {
        let outcome = engine
            .submit(Event::new(format!("e{i}"), "auth_failure", "fw"))
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Buffered));
    }
    // The fifth submit crossed batch_size and triggered the flush.
    assert_eq!(engine.metrics_snapshot().events_processed, 5);
}

#[test]
fn test_hot_reconfiguration_applies_immediately() {
    let engine = CorrelationEngine::builder()
        .store(Arc::new(MemoryStore::new()))
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![simple_rule("r1", "auth_failure")])
        .build()
        .unwrap();

    engine
        .config()
        .update(|config| config.cache_ttl = Duration::from_secs(120))
        .unwrap();
    assert_eq!(engine.config().get().cache_ttl, Duration::from_secs(120));

    // Invalid updates are rejected wholesale.
    assert!(engine.config().update(|config| config.batch_size = 0).is_err());
    assert!(engine.config().get().batch_size > 0);
}

#[test]
fn test_disabled_breaker_never_rejects() {
    let store = Arc::new(FlakyStore::new());
    let mut config = EngineConfig::default();
    config.circuit_breaker_enabled = false;
    config.breaker_threshold = 1;

    let engine = CorrelationEngine::builder()
        .config(config)
        .store(store.clone())
        .baselines(Arc::new(MemoryBaselineStore::new()))
        .rules(vec![threshold_rule("thr", 2)])
        .build()
        .unwrap();

    store.set_failing(true);
    for i in 0..5 {
        let event = Event::new(format!("e{i}"), "auth_failure", "fw")
            .with_field("source_ip", json!("9.9.9.9"));
        let results = evaluated(engine.process_event(event).unwrap());
        assert_eq!(results.len(), 1);
        assert!(!results[0].matched);
    }
    assert_eq!(engine.breaker_state(), BreakerState::Closed);
}

//! Real-time security event correlation engine.
//!
//! Events flow through admission control (circuit breaker, concurrency
//! guard), are narrowed to candidate rules by an inverted index with a
//! Bloom-filter front gate, and are evaluated by one of five strategies:
//! simple field conditions, count thresholds, ordered/unordered event
//! sequences, complex combinations, and baseline deviation. Stateful
//! correlation lives in an external key/value store abstraction so
//! multiple engine instances can share windows and sequences; stateless
//! outcomes are memoized in a TTL cache. Matches are emitted to injected
//! consumers over a bounded queue that never blocks evaluation.
//!
//! # Example
//!
//! ```
//! use correlation_engine::engine::{CorrelationEngine, EventOutcome};
//! use correlation_engine::event::Event;
//! use correlation_engine::rules::rules_from_yaml;
//! use correlation_engine::store::{MemoryBaselineStore, MemoryStore};
//! use std::sync::Arc;
//!
//! let rules = rules_from_yaml(
//!     r#"
//! - id: brute-force
//!   name: ssh brute force
//!   window_minutes: 5
//!   logic:
//!     type: threshold
//!     count_threshold: 5
//!     group_by: [source_ip]
//! "#,
//! )?;
//!
//! let engine = CorrelationEngine::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .baselines(Arc::new(MemoryBaselineStore::new()))
//!     .rules(rules)
//!     .build()?;
//!
//! let event = Event::new("evt-1", "auth_failure", "sshd")
//!     .with_field("source_ip", serde_json::json!("203.0.113.7"));
//! match engine.process_event(event)? {
//!     EventOutcome::Evaluated(results) => assert_eq!(results.len(), 1),
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! # Ok::<(), correlation_engine::error::EngineError>(())
//! ```

pub mod breaker;
pub mod cache;
pub mod config;
pub mod emit;
pub mod engine;
pub mod error;
pub mod eval;
pub mod event;
pub mod intake;
pub mod metrics;
pub mod rules;
pub mod store;
pub mod tuner;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::ResultCache;
pub use config::{ConfigHandle, EngineConfig};
pub use emit::{MatchConsumer, MatchPayload};
pub use engine::{CorrelationEngine, EngineBuilder, EventOutcome};
pub use error::{EngineError, Result};
pub use eval::{EvalStatus, EvaluationResult};
pub use event::{Event, EventSummary};
pub use intake::BatchOutcome;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use rules::{CorrelationRule, RuleLogic};
pub use store::{Baseline, BaselineStore, CorrelationStore, MemoryBaselineStore, MemoryStore};
pub use tuner::{AdaptiveTuner, TunerLimits, TuningAction};

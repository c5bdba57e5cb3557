//! Rule evaluation strategies and the shared result type.
//!
//! Each rule logic kind evaluates through its own module; [`evaluate`]
//! dispatches on the logic and stamps the execution time. Infrastructure
//! failures (the correlation store being down or erroring) surface as
//! `Err` so the caller can notch the circuit breaker; everything that is
//! merely a non-match, including malformed payload fragments, comes back
//! as an `Ok` result.

pub mod complex;
pub mod ml;
pub mod regex_cache;
pub mod sequence;
pub mod simple;
pub mod threshold;

use crate::error::Result;
use crate::event::Event;
use crate::rules::{CorrelationRule, RuleLogic};
use crate::store::{BaselineStore, CorrelationStore};
use regex_cache::RegexCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Terminal status of one rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    Match,
    NoMatch,
    Timeout,
    Error,
}

/// Outcome of evaluating one rule against one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub rule_id: String,
    pub status: EvalStatus,
    pub matched: bool,
    /// Score in [0, 1]; zero for anything that is not a match.
    pub confidence: f64,
    #[serde(with = "duration_millis")]
    pub execution_time: Duration,
    /// Human-readable descriptions of the conditions that held.
    pub matched_conditions: Vec<String>,
    /// Strategy-specific context (correlated events, deviations, flags).
    pub metadata: Map<String, Value>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_secs_f64() * 1000.0).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

impl EvaluationResult {
    pub fn matched(
        rule_id: impl Into<String>,
        confidence: f64,
        matched_conditions: Vec<String>,
    ) -> Self {
        EvaluationResult {
            rule_id: rule_id.into(),
            status: EvalStatus::Match,
            matched: true,
            confidence,
            execution_time: Duration::ZERO,
            matched_conditions,
            metadata: Map::new(),
        }
    }

    pub fn no_match(rule_id: impl Into<String>) -> Self {
        EvaluationResult {
            rule_id: rule_id.into(),
            status: EvalStatus::NoMatch,
            matched: false,
            confidence: 0.0,
            execution_time: Duration::ZERO,
            matched_conditions: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn timeout(rule_id: impl Into<String>, execution_time: Duration) -> Self {
        EvaluationResult {
            rule_id: rule_id.into(),
            status: EvalStatus::Timeout,
            matched: false,
            confidence: 0.0,
            execution_time,
            matched_conditions: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn error(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(message.into()));
        EvaluationResult {
            rule_id: rule_id.into(),
            status: EvalStatus::Error,
            matched: false,
            confidence: 0.0,
            execution_time: Duration::ZERO,
            matched_conditions: Vec::new(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Confidence for a match: 0.5 base, 0.1 per matched condition capped at
/// 0.3, 0.15 when correlated events back the match, clamped to 1.0.
pub fn confidence_score(matched_conditions: usize, has_correlated_events: bool) -> f64 {
    let condition_bonus = (matched_conditions as f64 * 0.1).min(0.3);
    let correlation_bonus = if has_correlated_events { 0.15 } else { 0.0 };
    (0.5 + condition_bonus + correlation_bonus).min(1.0)
}

/// Collaborators every strategy may need.
pub struct EvalContext<'a> {
    pub store: &'a dyn CorrelationStore,
    pub baselines: &'a dyn BaselineStore,
    pub regexes: &'a RegexCache,
}

/// Evaluate one rule against one event.
pub fn evaluate(rule: &CorrelationRule, event: &Event, ctx: &EvalContext<'_>) -> Result<EvaluationResult> {
    let start = Instant::now();
    let mut result = match &rule.logic {
        RuleLogic::Simple(logic) => simple::evaluate(rule, logic, event, ctx.regexes),
        RuleLogic::Threshold(logic) => threshold::evaluate(rule, logic, event, ctx.store)?,
        RuleLogic::Sequence(logic) => sequence::evaluate(rule, logic, event, ctx)?,
        RuleLogic::Complex(logic) => complex::evaluate(rule, logic, event, ctx)?,
        RuleLogic::MlBased(logic) => ml::evaluate(rule, logic, event, ctx.baselines)?,
    };
    result.execution_time = start.elapsed();
    Ok(result)
}

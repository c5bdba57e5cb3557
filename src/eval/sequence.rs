//! Sequence (multi-event progression) evaluation.
//!
//! Progress lives in the correlation store as one JSON document per
//! (rule, correlation key). Transitions go through compare-and-swap so
//! concurrent workers, or other engine instances sharing the store, can
//! never double-advance the same sequence. Ordered sequences only advance
//! on the next expected step and use the event's own timestamp to refuse
//! progressions that would imply an out-of-order match; anything else is
//! ignored without touching state. State is persisted with a TTL of the
//! step currently awaited, so a stalled attempt expires on its own.

use crate::error::Result;
use crate::event::{Event, EventSummary};
use crate::rules::{CorrelationRule, SequenceLogic, SequenceStep};
use super::simple::condition_matches;
use super::{confidence_score, EvalContext, EvaluationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const CAS_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SequenceState {
    /// One slot per step; `Some` once that step has been satisfied.
    matched: Vec<Option<EventSummary>>,
    started_at: DateTime<Utc>,
}

impl SequenceState {
    fn fresh(step_count: usize, started_at: DateTime<Utc>) -> Self {
        SequenceState {
            matched: vec![None; step_count],
            started_at,
        }
    }

    fn next_open(&self) -> Option<usize> {
        self.matched.iter().position(|slot| slot.is_none())
    }

    fn is_complete(&self) -> bool {
        self.matched.iter().all(|slot| slot.is_some())
    }

    fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.matched
            .iter()
            .flatten()
            .map(|summary| summary.timestamp)
            .max()
    }

    fn contains_event(&self, event_id: &str) -> bool {
        self.matched
            .iter()
            .flatten()
            .any(|summary| summary.id == event_id)
    }
}

pub fn evaluate(
    rule: &CorrelationRule,
    logic: &SequenceLogic,
    event: &Event,
    ctx: &EvalContext<'_>,
) -> Result<EvaluationResult> {
    if logic.steps.is_empty() {
        return Ok(EvaluationResult::no_match(&rule.id));
    }

    let Some(correlation) = correlation_value(logic, event) else {
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("missing_correlation_field", Value::Bool(true)));
    };
    let key = format!("seq:{}:{correlation}", rule.id);

    for _ in 0..CAS_ATTEMPTS {
        let current = ctx.store.get(&key)?;
        let state = match &current {
            Some(text) => match serde_json::from_str::<SequenceState>(text) {
                Ok(state) if state.matched.len() == logic.steps.len() => state,
                _ => {
                    // Stale shape from an older rule version; discard it.
                    warn!(rule_id = %rule.id, "discarding malformed sequence state");
                    ctx.store.delete(&key)?;
                    SequenceState::fresh(logic.steps.len(), event.timestamp)
                }
            },
            None => SequenceState::fresh(logic.steps.len(), event.timestamp),
        };

        let Some(advanced) = advance(&state, logic, event, ctx) else {
            return Ok(EvaluationResult::no_match(&rule.id));
        };

        if advanced.is_complete() {
            let serialized = serde_json::to_string(&advanced)?;
            if ctx
                .store
                .compare_and_swap(&key, current.as_deref(), &serialized, Duration::from_secs(5))?
            {
                ctx.store.delete(&key)?;
                return Ok(completion_result(rule, logic, &advanced, event));
            }
        } else {
            let ttl = awaiting_ttl(rule, logic, &advanced);
            let serialized = serde_json::to_string(&advanced)?;
            if ctx
                .store
                .compare_and_swap(&key, current.as_deref(), &serialized, ttl)?
            {
                let progress = advanced.matched.iter().flatten().count();
                return Ok(EvaluationResult::no_match(&rule.id)
                    .with_metadata("sequence_progress", Value::from(progress))
                    .with_metadata("sequence_length", Value::from(logic.steps.len())));
            }
        }
        // Lost the race; reload and try again.
    }

    warn!(rule_id = %rule.id, key = %key, "sequence transition contention, giving up");
    Ok(EvaluationResult::no_match(&rule.id).with_metadata("contention", Value::Bool(true)))
}

/// Apply the event to the state. `None` means the event neither advances
/// nor perturbs the sequence.
fn advance(
    state: &SequenceState,
    logic: &SequenceLogic,
    event: &Event,
    ctx: &EvalContext<'_>,
) -> Option<SequenceState> {
    if state.contains_event(&event.id) {
        return None;
    }

    let slot = if logic.ordered {
        let next = state.next_open()?;
        if !step_matches(&logic.steps[next], event, ctx) {
            return None;
        }
        // A step observed before the previous one would imply an
        // out-of-order progression; refuse it.
        if let Some(latest) = state.latest_timestamp() {
            if event.timestamp < latest {
                return None;
            }
        }
        next
    } else {
        logic
            .steps
            .iter()
            .enumerate()
            .position(|(i, step)| state.matched[i].is_none() && step_matches(step, event, ctx))?
    };

    let mut advanced = state.clone();
    advanced.matched[slot] = Some(event.summary());
    Some(advanced)
}

fn step_matches(step: &SequenceStep, event: &Event, ctx: &EvalContext<'_>) -> bool {
    event.event_type == step.event_type
        && step
            .conditions
            .iter()
            .all(|condition| condition_matches(condition, event, ctx.regexes))
}

/// TTL while waiting for the next step: that step's own timeout for
/// ordered sequences, the longest outstanding timeout for unordered ones.
fn awaiting_ttl(rule: &CorrelationRule, logic: &SequenceLogic, state: &SequenceState) -> Duration {
    let secs = if logic.ordered {
        state
            .next_open()
            .map(|next| logic.steps[next].timeout_secs)
            .unwrap_or(rule.window_minutes * 60)
    } else {
        logic
            .steps
            .iter()
            .enumerate()
            .filter(|(i, _)| state.matched[*i].is_none())
            .map(|(_, step)| step.timeout_secs)
            .max()
            .unwrap_or(rule.window_minutes * 60)
    };
    Duration::from_secs(secs)
}

fn completion_result(
    rule: &CorrelationRule,
    logic: &SequenceLogic,
    state: &SequenceState,
    event: &Event,
) -> EvaluationResult {
    let timeline: Vec<Value> = state
        .matched
        .iter()
        .flatten()
        .filter_map(|summary| serde_json::to_value(summary).ok())
        .collect();
    let total_duration = (event.timestamp - state.started_at)
        .to_std()
        .unwrap_or(Duration::ZERO);

    let step_types: Vec<&str> = logic.steps.iter().map(|s| s.event_type.as_str()).collect();
    let description = format!(
        "Sequence completed ({}): {}",
        if logic.ordered { "ordered" } else { "unordered" },
        step_types.join(" -> ")
    );
    let confidence = confidence_score(logic.steps.len(), true);

    EvaluationResult::matched(&rule.id, confidence, vec![description])
        .with_metadata("correlated_events", Value::Array(timeline))
        .with_metadata(
            "total_duration_secs",
            Value::from(total_duration.as_secs()),
        )
}

fn correlation_value(logic: &SequenceLogic, event: &Event) -> Option<String> {
    match &logic.correlation_field {
        Some(field) => event.field(field).map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        }),
        None => Some(event.source.clone()),
    }
}

//! Complex rule evaluation: every attached fragment must match.

use crate::error::Result;
use crate::event::Event;
use crate::rules::{ComplexLogic, CorrelationRule};
use super::{confidence_score, sequence, simple, threshold, EvalContext, EvaluationResult};
use serde_json::Value;

pub fn evaluate(
    rule: &CorrelationRule,
    logic: &ComplexLogic,
    event: &Event,
    ctx: &EvalContext<'_>,
) -> Result<EvaluationResult> {
    if logic.simple.is_none() && logic.threshold.is_none() && logic.sequence.is_none() {
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("empty_logic", Value::Bool(true)));
    }

    let mut matched_conditions = Vec::new();
    let mut correlated = Vec::new();

    // Cheapest fragment first so stateless misses skip store traffic.
    if let Some(fragment) = &logic.simple {
        let result = simple::evaluate(rule, fragment, event, ctx.regexes);
        if !result.matched {
            return Ok(EvaluationResult::no_match(&rule.id));
        }
        matched_conditions.extend(result.matched_conditions);
    }

    if let Some(fragment) = &logic.threshold {
        let result = threshold::evaluate(rule, fragment, event, ctx.store)?;
        if !result.matched {
            return Ok(EvaluationResult::no_match(&rule.id));
        }
        collect_correlated(&result, &mut correlated);
        matched_conditions.extend(result.matched_conditions);
    }

    if let Some(fragment) = &logic.sequence {
        let result = sequence::evaluate(rule, fragment, event, ctx)?;
        if !result.matched {
            return Ok(EvaluationResult::no_match(&rule.id));
        }
        collect_correlated(&result, &mut correlated);
        matched_conditions.extend(result.matched_conditions);
    }

    let confidence = confidence_score(matched_conditions.len(), !correlated.is_empty());
    let mut result = EvaluationResult::matched(&rule.id, confidence, matched_conditions);
    if !correlated.is_empty() {
        result = result.with_metadata("correlated_events", Value::Array(correlated));
    }
    Ok(result)
}

fn collect_correlated(result: &EvaluationResult, out: &mut Vec<Value>) {
    if let Some(Value::Array(items)) = result.metadata.get("correlated_events") {
        out.extend(items.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::regex_cache::RegexCache;
    use crate::rules::{
        Combinator, Condition, ConditionOperator, RuleLogic, SimpleLogic, ThresholdLogic,
    };
    use crate::store::{MemoryBaselineStore, MemoryStore};
    use serde_json::json;

    fn complex_rule() -> CorrelationRule {
        CorrelationRule {
            id: "cx-1".to_string(),
            name: String::new(),
            enabled: true,
            window_minutes: 5,
            logic: RuleLogic::Complex(ComplexLogic {
                simple: Some(SimpleLogic {
                    conditions: vec![Condition {
                        field: "event_type".to_string(),
                        operator: ConditionOperator::Equals,
                        value: json!("auth_failure"),
                        case_sensitive: false,
                    }],
                    combinator: Combinator::And,
                }),
                threshold: Some(ThresholdLogic {
                    count_threshold: 3,
                    group_by: vec!["source_ip".to_string()],
                }),
                sequence: None,
            }),
        }
    }

    fn logic_of(rule: &CorrelationRule) -> &ComplexLogic {
        match &rule.logic {
            RuleLogic::Complex(c) => c,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_all_fragments_must_match() {
        let store = MemoryStore::new();
        let baselines = MemoryBaselineStore::new();
        let regexes = RegexCache::new();
        let ctx = EvalContext {
            store: &store,
            baselines: &baselines,
            regexes: &regexes,
        };
        let rule = complex_rule();
        let logic = logic_of(&rule);

        // Simple fragment matches but the counter is still below three.
        for i in 1..=2 {
            let event = Event::new(format!("e{i}"), "auth_failure", "fw")
                .with_field("source_ip", json!("10.0.0.9"));
            let result = evaluate(&rule, logic, &event, &ctx).unwrap();
            assert!(!result.matched);
        }

        let event = Event::new("e3", "auth_failure", "fw")
            .with_field("source_ip", json!("10.0.0.9"));
        let result = evaluate(&rule, logic, &event, &ctx).unwrap();
        assert!(result.matched);
        assert_eq!(result.matched_conditions.len(), 2);
        assert!(result.metadata["correlated_events"].as_array().unwrap().len() >= 3);
        // Two conditions plus correlated events.
        assert!((result.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_simple_miss_short_circuits_before_store() {
        let store = crate::store::UnavailableStore;
        let baselines = MemoryBaselineStore::new();
        let regexes = RegexCache::new();
        let ctx = EvalContext {
            store: &store,
            baselines: &baselines,
            regexes: &regexes,
        };
        let rule = complex_rule();
        let event = Event::new("e1", "benign", "fw").with_field("source_ip", json!("10.0.0.9"));
        // The stateless fragment fails first, so the dead store is never hit.
        let result = evaluate(&rule, logic_of(&rule), &event, &ctx).unwrap();
        assert!(!result.matched);
    }

    #[test]
    fn test_empty_fragments_is_flagged_no_match() {
        let store = MemoryStore::new();
        let baselines = MemoryBaselineStore::new();
        let regexes = RegexCache::new();
        let ctx = EvalContext {
            store: &store,
            baselines: &baselines,
            regexes: &regexes,
        };
        let rule = CorrelationRule {
            id: "cx-empty".to_string(),
            name: String::new(),
            enabled: true,
            window_minutes: 5,
            logic: RuleLogic::Complex(ComplexLogic {
                simple: None,
                threshold: None,
                sequence: None,
            }),
        };
        let event = Event::new("e1", "anything", "src");
        let result = evaluate(&rule, logic_of(&rule), &event, &ctx).unwrap();
        assert!(!result.matched);
        assert_eq!(result.metadata["empty_logic"], json!(true));
    }
}

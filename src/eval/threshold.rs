//! Threshold (count within window) evaluation.
//!
//! Each distinct combination of group-by values gets its own counter and
//! event list in the correlation store. The counter's TTL is set when the
//! first event of a window arrives and is never extended, so a burst
//! cannot keep its own window alive. Counting is a single atomic store
//! increment; no locks are held across events.

use crate::error::Result;
use crate::event::Event;
use crate::rules::{CorrelationRule, ThresholdLogic};
use crate::store::CorrelationStore;
use super::{confidence_score, EvaluationResult};
use serde_json::Value;

pub fn evaluate(
    rule: &CorrelationRule,
    logic: &ThresholdLogic,
    event: &Event,
    store: &dyn CorrelationStore,
) -> Result<EvaluationResult> {
    let Some(group) = group_key(logic, event) else {
        // An event without the grouping fields belongs to no group.
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("missing_group_fields", Value::Bool(true)));
    };

    let window = rule.window();
    let counter_key = format!("thr:{}:{group}", rule.id);
    let events_key = format!("thr-ev:{}:{group}", rule.id);

    let count = store.incr_with_ttl(&counter_key, window)?;
    let summary = serde_json::to_string(&event.summary())?;
    store.append_with_ttl(&events_key, &summary, window)?;

    if count < logic.count_threshold {
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("current_count", Value::from(count)));
    }

    let correlated: Vec<Value> = store
        .list_range(&events_key, 0, usize::MAX)?
        .iter()
        .filter_map(|item| serde_json::from_str(item).ok())
        .collect();

    let description = format!(
        "Event count {count} >= {} in {} minutes",
        logic.count_threshold, rule.window_minutes
    );
    let confidence = confidence_score(1, !correlated.is_empty());
    let result = EvaluationResult::matched(&rule.id, confidence, vec![description])
        .with_metadata("current_count", Value::from(count))
        .with_metadata("group_key", Value::String(group))
        .with_metadata("correlated_events", Value::Array(correlated));
    Ok(result)
}

/// Stable group identity: `field=value` pairs in rule order. `None` when
/// any grouping field is absent from the event.
fn group_key(logic: &ThresholdLogic, event: &Event) -> Option<String> {
    let mut parts = Vec::with_capacity(logic.group_by.len());
    for field in &logic.group_by {
        let value = event.field(field)?;
        let rendered = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        parts.push(format!("{field}={rendered}"));
    }
    Some(parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleLogic;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn rule(threshold: u64, group_by: &[&str]) -> CorrelationRule {
        CorrelationRule {
            id: "thr-1".to_string(),
            name: String::new(),
            enabled: true,
            window_minutes: 5,
            logic: RuleLogic::Threshold(ThresholdLogic {
                count_threshold: threshold,
                group_by: group_by.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    fn logic_of(rule: &CorrelationRule) -> &ThresholdLogic {
        match &rule.logic {
            RuleLogic::Threshold(t) => t,
            _ => unreachable!(),
        }
    }

    fn login_event(id: &str, ip: &str) -> Event {
        Event::new(id, "auth_failure", "firewall").with_field("source_ip", json!(ip))
    }

    #[test]
    fn test_matches_at_exact_threshold() {
        let store = MemoryStore::new();
        let rule = rule(5, &["source_ip"]);
        for i in 1..=4 {
            let result = evaluate(
                &rule,
                logic_of(&rule),
                &login_event(&format!("e{i}"), "10.0.0.1"),
                &store,
            )
            .unwrap();
            assert!(!result.matched, "event {i} should not match yet");
            assert_eq!(result.metadata["current_count"], json!(i));
        }

        let result = evaluate(
            &rule,
            logic_of(&rule),
            &login_event("e5", "10.0.0.1"),
            &store,
        )
        .unwrap();
        assert!(result.matched);
        assert_eq!(
            result.matched_conditions,
            vec!["Event count 5 >= 5 in 5 minutes"]
        );
        assert_eq!(
            result.metadata["correlated_events"].as_array().unwrap().len(),
            5
        );
        assert!((result.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_groups_count_independently() {
        let store = MemoryStore::new();
        let rule = rule(3, &["source_ip"]);
        for i in 0..2 {
            evaluate(&rule, logic_of(&rule), &login_event(&format!("a{i}"), "10.0.0.1"), &store)
                .unwrap();
            evaluate(&rule, logic_of(&rule), &login_event(&format!("b{i}"), "10.0.0.2"), &store)
                .unwrap();
        }
        let result = evaluate(
            &rule,
            logic_of(&rule),
            &login_event("a2", "10.0.0.1"),
            &store,
        )
        .unwrap();
        assert!(result.matched);
        assert!(result.metadata["group_key"]
            .as_str()
            .unwrap()
            .contains("10.0.0.1"));
    }

    #[test]
    fn test_missing_group_field_is_no_match() {
        let store = MemoryStore::new();
        let rule = rule(1, &["source_ip"]);
        let event = Event::new("e1", "auth_failure", "firewall");
        let result = evaluate(&rule, logic_of(&rule), &event, &store).unwrap();
        assert!(!result.matched);
        assert_eq!(result.metadata["missing_group_fields"], json!(true));
    }

    #[test]
    fn test_multi_field_group_key_order_is_stable() {
        let rule = rule(5, &["source_ip", "username"]);
        let event = login_event("e1", "10.0.0.1").with_field("username", json!("root"));
        assert_eq!(
            group_key(logic_of(&rule), &event).unwrap(),
            "source_ip=10.0.0.1|username=root"
        );
    }

    #[test]
    fn test_keeps_matching_past_threshold() {
        let store = MemoryStore::new();
        let rule = rule(2, &["source_ip"]);
        for i in 0..2 {
            evaluate(&rule, logic_of(&rule), &login_event(&format!("e{i}"), "1.1.1.1"), &store)
                .unwrap();
        }
        let result = evaluate(
            &rule,
            logic_of(&rule),
            &login_event("e9", "1.1.1.1"),
            &store,
        )
        .unwrap();
        assert!(result.matched);
        assert_eq!(result.metadata["current_count"], json!(3));
    }
}

//! Stateless condition evaluation.
//!
//! A condition on an absent field is false for every operator, including
//! the negated ones; events that do not carry a field say nothing about
//! it. An invalid regex likewise makes its condition false rather than
//! failing the evaluation, with the problem already reported at load time.

use crate::event::Event;
use crate::rules::{Combinator, Condition, ConditionOperator, CorrelationRule, SimpleLogic};
use super::regex_cache::RegexCache;
use super::{confidence_score, EvaluationResult};
use serde_json::Value;
use tracing::debug;

pub fn evaluate(
    rule: &CorrelationRule,
    logic: &SimpleLogic,
    event: &Event,
    regexes: &RegexCache,
) -> EvaluationResult {
    if logic.conditions.is_empty() {
        return EvaluationResult::no_match(&rule.id);
    }

    let mut matched_descriptions = Vec::new();
    let mut all = true;
    let mut any = false;
    for condition in &logic.conditions {
        if condition_matches(condition, event, regexes) {
            any = true;
            matched_descriptions.push(describe(condition));
        } else {
            all = false;
        }
    }

    let matched = match logic.combinator {
        Combinator::And => all,
        Combinator::Or => any,
    };
    if !matched {
        return EvaluationResult::no_match(&rule.id);
    }

    let confidence = confidence_score(matched_descriptions.len(), false);
    EvaluationResult::matched(&rule.id, confidence, matched_descriptions)
}

/// Test one condition against an event. Missing field means false.
pub fn condition_matches(condition: &Condition, event: &Event, regexes: &RegexCache) -> bool {
    let Some(actual) = event.field(&condition.field) else {
        return false;
    };

    match condition.operator {
        ConditionOperator::Equals => values_equal(&actual, &condition.value, condition.case_sensitive),
        ConditionOperator::Contains => match (&actual, condition.value.as_str()) {
            (Value::String(haystack), Some(needle)) => {
                if condition.case_sensitive {
                    haystack.contains(needle)
                } else {
                    haystack.to_lowercase().contains(&needle.to_lowercase())
                }
            }
            _ => false,
        },
        ConditionOperator::GreaterThan => match (as_number(&actual), as_number(&condition.value)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOperator::LessThan => match (as_number(&actual), as_number(&condition.value)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        ConditionOperator::RegexMatch => {
            let (Some(haystack), Some(pattern)) = (actual.as_str(), condition.value.as_str())
            else {
                return false;
            };
            match regexes.get_or_compile(pattern, condition.case_sensitive) {
                Ok(regex) => regex.is_match(haystack),
                Err(err) => {
                    debug!(field = %condition.field, %err, "regex condition failed closed");
                    false
                }
            }
        }
        ConditionOperator::In => in_list(&actual, &condition.value, condition.case_sensitive),
        ConditionOperator::NotIn => {
            condition.value.is_array() && !in_list(&actual, &condition.value, condition.case_sensitive)
        }
    }
}

fn values_equal(actual: &Value, expected: &Value, case_sensitive: bool) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => {
            if case_sensitive {
                a == b
            } else {
                a.eq_ignore_ascii_case(b)
            }
        }
        (a, b) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Numeric view of a value; numeric strings count.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn in_list(actual: &Value, list: &Value, case_sensitive: bool) -> bool {
    list.as_array()
        .map(|items| items.iter().any(|item| values_equal(actual, item, case_sensitive)))
        .unwrap_or(false)
}

fn describe(condition: &Condition) -> String {
    let operator = match condition.operator {
        ConditionOperator::Equals => "equals",
        ConditionOperator::Contains => "contains",
        ConditionOperator::GreaterThan => "greater_than",
        ConditionOperator::LessThan => "less_than",
        ConditionOperator::RegexMatch => "matches",
        ConditionOperator::In => "in",
        ConditionOperator::NotIn => "not_in",
    };
    let value = match &condition.value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("{} {} {}", condition.field, operator, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleLogic;
    use serde_json::json;

    fn rule_with(conditions: Vec<Condition>, combinator: Combinator) -> CorrelationRule {
        CorrelationRule {
            id: "simple-1".to_string(),
            name: String::new(),
            enabled: true,
            window_minutes: 5,
            logic: RuleLogic::Simple(SimpleLogic {
                conditions,
                combinator,
            }),
        }
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
            case_sensitive: false,
        }
    }

    fn logic_of(rule: &CorrelationRule) -> &SimpleLogic {
        match &rule.logic {
            RuleLogic::Simple(s) => s,
            _ => unreachable!(),
        }
    }

    fn event() -> Event {
        Event::new("e1", "auth_failure", "firewall")
            .with_field("username", json!("Admin"))
            .with_field("attempts", json!(7))
            .with_field("path", json!("/var/log/auth.log"))
    }

    #[test]
    fn test_and_all_conditions_must_hold() {
        let regexes = RegexCache::new();
        let rule = rule_with(
            vec![
                cond("event_type", ConditionOperator::Equals, json!("auth_failure")),
                cond("attempts", ConditionOperator::GreaterThan, json!(5)),
            ],
            Combinator::And,
        );
        let result = evaluate(&rule, logic_of(&rule), &event(), &regexes);
        assert!(result.matched);
        assert_eq!(result.matched_conditions.len(), 2);
        assert!((result.confidence - 0.7).abs() < 1e-9);

        let rule = rule_with(
            vec![
                cond("event_type", ConditionOperator::Equals, json!("auth_failure")),
                cond("attempts", ConditionOperator::GreaterThan, json!(50)),
            ],
            Combinator::And,
        );
        let result = evaluate(&rule, logic_of(&rule), &event(), &regexes);
        assert!(!result.matched);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_or_single_branch_suffices() {
        let regexes = RegexCache::new();
        let rule = rule_with(
            vec![
                cond("event_type", ConditionOperator::Equals, json!("nope")),
                cond("username", ConditionOperator::Contains, json!("adm")),
            ],
            Combinator::Or,
        );
        let result = evaluate(&rule, logic_of(&rule), &event(), &regexes);
        assert!(result.matched);
        assert_eq!(result.matched_conditions, vec!["username contains adm"]);
        assert!((result.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_equals_case_sensitivity() {
        let regexes = RegexCache::new();
        let mut condition = cond("username", ConditionOperator::Equals, json!("admin"));
        assert!(condition_matches(&condition, &event(), &regexes));
        condition.case_sensitive = true;
        assert!(!condition_matches(&condition, &event(), &regexes));
    }

    #[test]
    fn test_numeric_comparisons_coerce_strings() {
        let regexes = RegexCache::new();
        let event = Event::new("e1", "transfer", "proxy").with_field("bytes", json!("4096"));
        assert!(condition_matches(
            &cond("bytes", ConditionOperator::GreaterThan, json!(1024)),
            &event,
            &regexes
        ));
        assert!(condition_matches(
            &cond("bytes", ConditionOperator::LessThan, json!(10_000)),
            &event,
            &regexes
        ));
        assert!(condition_matches(
            &cond("bytes", ConditionOperator::Equals, json!(4096)),
            &event,
            &regexes
        ));
    }

    #[test]
    fn test_regex_match_and_fail_closed() {
        let regexes = RegexCache::new();
        assert!(condition_matches(
            &cond("path", ConditionOperator::RegexMatch, json!(r"auth\.log$")),
            &event(),
            &regexes
        ));
        assert!(!condition_matches(
            &cond("path", ConditionOperator::RegexMatch, json!("([unclosed")),
            &event(),
            &regexes
        ));
    }

    #[test]
    fn test_in_and_not_in() {
        let regexes = RegexCache::new();
        assert!(condition_matches(
            &cond("username", ConditionOperator::In, json!(["root", "admin"])),
            &event(),
            &regexes
        ));
        assert!(!condition_matches(
            &cond("username", ConditionOperator::NotIn, json!(["root", "admin"])),
            &event(),
            &regexes
        ));
        assert!(condition_matches(
            &cond("username", ConditionOperator::NotIn, json!(["guest"])),
            &event(),
            &regexes
        ));
    }

    #[test]
    fn test_absent_field_is_false_even_negated() {
        let regexes = RegexCache::new();
        assert!(!condition_matches(
            &cond("missing", ConditionOperator::Equals, json!("x")),
            &event(),
            &regexes
        ));
        assert!(!condition_matches(
            &cond("missing", ConditionOperator::NotIn, json!(["x"])),
            &event(),
            &regexes
        ));
    }

    #[test]
    fn test_envelope_columns_are_addressable() {
        let regexes = RegexCache::new();
        assert!(condition_matches(
            &cond("source", ConditionOperator::Equals, json!("firewall")),
            &event(),
            &regexes
        ));
    }

    #[test]
    fn test_empty_conditions_never_match() {
        let regexes = RegexCache::new();
        let rule = rule_with(vec![], Combinator::And);
        assert!(!evaluate(&rule, logic_of(&rule), &event(), &regexes).matched);
    }
}

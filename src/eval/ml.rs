//! Baseline-deviation (ml-based) evaluation.
//!
//! Compares the event's metric value against a behavioral baseline for
//! the entity. A missing baseline is an expected condition for entities
//! the profiler has not seen yet, so it is a flagged non-match rather
//! than an error.

use crate::error::Result;
use crate::event::Event;
use crate::rules::{CorrelationRule, MlLogic};
use crate::store::BaselineStore;
use super::{confidence_score, EvaluationResult};
use serde_json::Value;

/// Baselines below this confidence are too weak to alert on.
const BASELINE_CONFIDENCE_FLOOR: f64 = 0.7;

pub fn evaluate(
    rule: &CorrelationRule,
    logic: &MlLogic,
    event: &Event,
    baselines: &dyn BaselineStore,
) -> Result<EvaluationResult> {
    let Some(entity_id) = event.field(&logic.entity_id_field).map(render) else {
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("missing_entity_id", Value::Bool(true)));
    };
    let Some(observed) = event.field(&logic.metric_name).and_then(|v| as_number(&v)) else {
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("missing_metric", Value::Bool(true)));
    };

    let Some(baseline) = baselines.query(&logic.entity_type, &entity_id, &logic.metric_name)?
    else {
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("baseline_missing", Value::Bool(true)));
    };

    if baseline.std_dev <= f64::EPSILON {
        // A flat baseline cannot express deviation in sigmas.
        return Ok(EvaluationResult::no_match(&rule.id)
            .with_metadata("degenerate_baseline", Value::Bool(true)));
    }

    let deviation = (observed - baseline.mean) / baseline.std_dev;
    let anomalous =
        deviation.abs() > logic.anomaly_sigma && baseline.confidence > BASELINE_CONFIDENCE_FLOOR;

    let mut result = if anomalous {
        let description = format!(
            "{} deviates {:.1} sigma from baseline (threshold {:.1})",
            logic.metric_name,
            deviation.abs(),
            logic.anomaly_sigma
        );
        EvaluationResult::matched(&rule.id, confidence_score(1, false), vec![description])
    } else {
        EvaluationResult::no_match(&rule.id)
    };

    result = result
        .with_metadata("entity_id", Value::String(entity_id))
        .with_metadata("observed_value", Value::from(observed))
        .with_metadata("baseline_mean", Value::from(baseline.mean))
        .with_metadata("baseline_std_dev", Value::from(baseline.std_dev))
        .with_metadata("baseline_confidence", Value::from(baseline.confidence))
        .with_metadata("deviation_sigma", Value::from(deviation));
    Ok(result)
}

fn render(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleLogic;
    use crate::store::{Baseline, MemoryBaselineStore};
    use serde_json::json;

    fn ml_rule(sigma: f64) -> CorrelationRule {
        CorrelationRule {
            id: "ml-1".to_string(),
            name: String::new(),
            enabled: true,
            window_minutes: 60,
            logic: RuleLogic::MlBased(MlLogic {
                entity_type: "user".to_string(),
                entity_id_field: "username".to_string(),
                metric_name: "login_count".to_string(),
                anomaly_sigma: sigma,
            }),
        }
    }

    fn logic_of(rule: &CorrelationRule) -> &MlLogic {
        match &rule.logic {
            RuleLogic::MlBased(m) => m,
            _ => unreachable!(),
        }
    }

    fn event(value: f64) -> Event {
        Event::new("e1", "login_summary", "idp")
            .with_field("username", json!("alice"))
            .with_field("login_count", json!(value))
    }

    fn baselines(mean: f64, std_dev: f64, confidence: f64) -> MemoryBaselineStore {
        let store = MemoryBaselineStore::new();
        store.insert(
            "user",
            "alice",
            "login_count",
            Baseline {
                mean,
                std_dev,
                confidence,
            },
        );
        store
    }

    #[test]
    fn test_four_sigma_deviation_matches() {
        let rule = ml_rule(3.0);
        let store = baselines(100.0, 10.0, 0.8);
        let result = evaluate(&rule, logic_of(&rule), &event(140.0), &store).unwrap();
        assert!(result.matched);
        assert_eq!(result.metadata["deviation_sigma"], json!(4.0));
        assert!(result.matched_conditions[0].contains("4.0 sigma"));
    }

    #[test]
    fn test_below_threshold_is_no_match_with_context() {
        let rule = ml_rule(3.0);
        let store = baselines(100.0, 10.0, 0.8);
        let result = evaluate(&rule, logic_of(&rule), &event(115.0), &store).unwrap();
        assert!(!result.matched);
        assert_eq!(result.metadata["deviation_sigma"], json!(1.5));
        assert_eq!(result.metadata["baseline_mean"], json!(100.0));
    }

    #[test]
    fn test_negative_deviation_uses_absolute_value() {
        let rule = ml_rule(3.0);
        let store = baselines(100.0, 10.0, 0.9);
        let result = evaluate(&rule, logic_of(&rule), &event(55.0), &store).unwrap();
        assert!(result.matched);
        assert_eq!(result.metadata["deviation_sigma"], json!(-4.5));
    }

    #[test]
    fn test_weak_baseline_confidence_blocks_match() {
        let rule = ml_rule(3.0);
        let store = baselines(100.0, 10.0, 0.5);
        let result = evaluate(&rule, logic_of(&rule), &event(200.0), &store).unwrap();
        assert!(!result.matched);
    }

    #[test]
    fn test_missing_baseline_is_flagged_non_match() {
        let rule = ml_rule(3.0);
        let store = MemoryBaselineStore::new();
        let result = evaluate(&rule, logic_of(&rule), &event(140.0), &store).unwrap();
        assert!(!result.matched);
        assert_eq!(result.metadata["baseline_missing"], json!(true));
    }

    #[test]
    fn test_zero_std_dev_is_degenerate() {
        let rule = ml_rule(3.0);
        let store = baselines(100.0, 0.0, 0.9);
        let result = evaluate(&rule, logic_of(&rule), &event(500.0), &store).unwrap();
        assert!(!result.matched);
        assert_eq!(result.metadata["degenerate_baseline"], json!(true));
    }

    #[test]
    fn test_missing_metric_field() {
        let rule = ml_rule(3.0);
        let store = baselines(100.0, 10.0, 0.9);
        let event = Event::new("e1", "login_summary", "idp").with_field("username", json!("alice"));
        let result = evaluate(&rule, logic_of(&rule), &event, &store).unwrap();
        assert!(!result.matched);
        assert_eq!(result.metadata["missing_metric"], json!(true));
    }
}

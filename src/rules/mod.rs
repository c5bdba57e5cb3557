//! Correlation rule model and loading.
//!
//! Rule logic is a tagged union validated once at load time, so the
//! evaluation strategies never shape-check payloads at runtime. Malformed
//! logic degrades to a zero-confidence non-match at evaluation; validation
//! surfaces it loudly when the rule is loaded.

pub mod index;
pub mod prefilter;

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

pub type RuleId = String;

/// Comparison operator for a simple condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    RegexMatch,
    In,
    NotIn,
}

/// How a simple rule combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// One field condition inside a simple logic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// Stateless condition logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleLogic {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub combinator: Combinator,
}

/// Count-within-window logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLogic {
    pub count_threshold: u64,
    pub group_by: Vec<String>,
}

/// One expected sub-event inside a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub event_type: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Budget for reaching this step once the previous step matched.
    pub timeout_secs: u64,
}

/// Ordered or unordered progression logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceLogic {
    #[serde(default = "default_ordered")]
    pub ordered: bool,
    pub steps: Vec<SequenceStep>,
    /// Field whose value keys the sequence state; defaults to the
    /// event source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_field: Option<String>,
}

fn default_ordered() -> bool {
    true
}

/// Any combination of fragments, all of which must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexLogic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple: Option<SimpleLogic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdLogic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceLogic>,
}

/// Baseline-deviation logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlLogic {
    pub entity_type: String,
    pub entity_id_field: String,
    pub metric_name: String,
    /// Match threshold in standard deviations.
    pub anomaly_sigma: f64,
}

/// Tagged rule logic; exactly one payload per rule, consistent with its
/// declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleLogic {
    Simple(SimpleLogic),
    Threshold(ThresholdLogic),
    Sequence(SequenceLogic),
    Complex(ComplexLogic),
    MlBased(MlLogic),
}

impl RuleLogic {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleLogic::Simple(_) => "simple",
            RuleLogic::Threshold(_) => "threshold",
            RuleLogic::Sequence(_) => "sequence",
            RuleLogic::Complex(_) => "complex",
            RuleLogic::MlBased(_) => "ml_based",
        }
    }
}

/// A loaded correlation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: RuleId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Correlation time window in minutes; drives counter and state TTLs.
    pub window_minutes: u64,
    pub logic: RuleLogic,
}

fn default_enabled() -> bool {
    true
}

impl CorrelationRule {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_minutes * 60)
    }

    /// Whether this rule's outcome depends only on the current event,
    /// which makes it eligible for the result cache and the fast path.
    pub fn is_stateless(&self) -> bool {
        matches!(self.logic, RuleLogic::Simple(_))
    }

    /// Fields the rule reads from an event, used for cache fingerprints.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        collect_fields(&self.logic, &mut fields);
        fields.sort();
        fields.dedup();
        fields
    }

    /// Validate the rule's payload. Structural problems that would make
    /// the rule unable to ever match are reported as warnings; the rule
    /// still loads and fails closed at evaluation time.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidRuleLogic(
                "rule id must not be empty".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        if self.window_minutes == 0 {
            warnings.push(format!("rule {}: zero time window", self.id));
        }
        validate_logic(&self.id, &self.logic, &mut warnings);
        Ok(warnings)
    }
}

fn collect_fields(logic: &RuleLogic, out: &mut Vec<String>) {
    match logic {
        RuleLogic::Simple(simple) => {
            out.extend(simple.conditions.iter().map(|c| c.field.clone()));
        }
        RuleLogic::Threshold(threshold) => out.extend(threshold.group_by.iter().cloned()),
        RuleLogic::Sequence(sequence) => {
            if let Some(field) = &sequence.correlation_field {
                out.push(field.clone());
            }
            for step in &sequence.steps {
                out.extend(step.conditions.iter().map(|c| c.field.clone()));
            }
        }
        RuleLogic::Complex(complex) => {
            if let Some(simple) = &complex.simple {
                out.extend(simple.conditions.iter().map(|c| c.field.clone()));
            }
            if let Some(threshold) = &complex.threshold {
                out.extend(threshold.group_by.iter().cloned());
            }
            if let Some(sequence) = &complex.sequence {
                for step in &sequence.steps {
                    out.extend(step.conditions.iter().map(|c| c.field.clone()));
                }
            }
        }
        RuleLogic::MlBased(ml) => {
            out.push(ml.entity_id_field.clone());
            out.push(ml.metric_name.clone());
        }
    }
}

fn validate_logic(rule_id: &str, logic: &RuleLogic, warnings: &mut Vec<String>) {
    match logic {
        RuleLogic::Simple(simple) => {
            if simple.conditions.is_empty() {
                warnings.push(format!("rule {rule_id}: simple logic has no conditions"));
            }
            for condition in &simple.conditions {
                validate_condition(rule_id, condition, warnings);
            }
        }
        RuleLogic::Threshold(threshold) => {
            if threshold.count_threshold == 0 {
                warnings.push(format!("rule {rule_id}: threshold count of zero"));
            }
            if threshold.group_by.is_empty() {
                warnings.push(format!("rule {rule_id}: threshold has no group_by fields"));
            }
        }
        RuleLogic::Sequence(sequence) => {
            if sequence.steps.len() < 2 {
                warnings.push(format!("rule {rule_id}: sequence has fewer than two steps"));
            }
            for (i, step) in sequence.steps.iter().enumerate() {
                if step.event_type.is_empty() {
                    warnings.push(format!("rule {rule_id}: step {i} has empty event_type"));
                }
                if step.timeout_secs == 0 {
                    warnings.push(format!("rule {rule_id}: step {i} has zero timeout"));
                }
                for condition in &step.conditions {
                    validate_condition(rule_id, condition, warnings);
                }
            }
        }
        RuleLogic::Complex(complex) => {
            if complex.simple.is_none() && complex.threshold.is_none() && complex.sequence.is_none()
            {
                warnings.push(format!("rule {rule_id}: complex logic has no fragments"));
            }
            if let Some(simple) = &complex.simple {
                validate_logic(rule_id, &RuleLogic::Simple(simple.clone()), warnings);
            }
            if let Some(threshold) = &complex.threshold {
                validate_logic(rule_id, &RuleLogic::Threshold(threshold.clone()), warnings);
            }
            if let Some(sequence) = &complex.sequence {
                validate_logic(rule_id, &RuleLogic::Sequence(sequence.clone()), warnings);
            }
        }
        RuleLogic::MlBased(ml) => {
            if ml.entity_id_field.is_empty() || ml.metric_name.is_empty() {
                warnings.push(format!(
                    "rule {rule_id}: ml logic missing entity_id_field or metric_name"
                ));
            }
            if ml.anomaly_sigma <= 0.0 {
                warnings.push(format!("rule {rule_id}: non-positive anomaly threshold"));
            }
        }
    }
}

fn validate_condition(rule_id: &str, condition: &Condition, warnings: &mut Vec<String>) {
    if condition.field.is_empty() {
        warnings.push(format!("rule {rule_id}: condition with empty field"));
    }
    match condition.operator {
        ConditionOperator::RegexMatch => {
            // Fail-closed at evaluation, but loud here: an unparseable
            // pattern means the condition can never be true.
            if let Some(pattern) = condition.value.as_str() {
                if let Err(err) = regex::Regex::new(pattern) {
                    warnings.push(format!(
                        "rule {rule_id}: invalid regex '{pattern}' ({err}); condition will never match"
                    ));
                }
            } else {
                warnings.push(format!(
                    "rule {rule_id}: regex_match value must be a string"
                ));
            }
        }
        ConditionOperator::In | ConditionOperator::NotIn => {
            if !condition.value.is_array() {
                warnings.push(format!(
                    "rule {rule_id}: {:?} value must be an array",
                    condition.operator
                ));
            }
        }
        _ => {}
    }
}

/// A rule row as persisted in the relational rule source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub rule_type: String,
    pub rule_logic: Value,
    pub time_window_minutes: u64,
    #[serde(default)]
    pub threshold: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl TryFrom<RuleRow> for CorrelationRule {
    type Error = EngineError;

    fn try_from(row: RuleRow) -> Result<Self> {
        let mut payload = row.rule_logic;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("type".to_string(), Value::String(row.rule_type.clone()));
            // The dedicated threshold column wins over the payload copy.
            if let Some(threshold) = row.threshold {
                if row.rule_type == "threshold" {
                    obj.insert("count_threshold".to_string(), Value::from(threshold));
                }
            }
        } else {
            return Err(EngineError::RuleLoadError(format!(
                "rule {}: logic payload is not an object",
                row.id
            )));
        }

        let logic: RuleLogic = serde_json::from_value(payload).map_err(|err| {
            EngineError::RuleLoadError(format!("rule {}: {err}", row.id))
        })?;

        Ok(CorrelationRule {
            id: row.id,
            name: row.name,
            enabled: row.enabled,
            window_minutes: row.time_window_minutes,
            logic,
        })
    }
}

/// Parse a YAML document holding a list of rules.
pub fn rules_from_yaml(text: &str) -> Result<Vec<CorrelationRule>> {
    let rules: Vec<CorrelationRule> = serde_yaml::from_str(text)?;
    for rule in &rules {
        for warning in rule.validate()? {
            warn!(rule_id = %rule.id, "{warning}");
        }
    }
    Ok(rules)
}

/// Convert rule-source rows, logging validation warnings per rule.
pub fn rules_from_rows(rows: Vec<RuleRow>) -> Result<Vec<CorrelationRule>> {
    let mut rules = Vec::with_capacity(rows.len());
    for row in rows {
        let rule = CorrelationRule::try_from(row)?;
        for warning in rule.validate()? {
            warn!(rule_id = %rule.id, "{warning}");
        }
        rules.push(rule);
    }
    Ok(rules)
}

//! Literal prefilter over stateless rule conditions.
//!
//! Harvests string literals from simple rules and checks incoming events
//! against them before any rule is evaluated. An event containing none of
//! the literals cannot match any eligible rule, so those rules are skipped
//! wholesale. Small pattern sets use a linear scan, larger ones an
//! AhoCorasick automaton, switched at a fixed threshold.

use crate::event::Event;
use crate::rules::{Combinator, ConditionOperator, CorrelationRule, RuleLogic, SimpleLogic};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Pattern count at which the automaton pays for itself.
const AHOCORASICK_THRESHOLD: usize = 20;

#[derive(Debug)]
enum FilterStrategy {
    /// Linear scan for small pattern sets.
    Simple { patterns: Vec<String> },
    /// Automaton for large sets, ASCII case-insensitive.
    AhoCorasick { automaton: AhoCorasick },
}

/// Prefilter built once per rule-index generation.
#[derive(Debug)]
pub struct LiteralPrefilter {
    strategy: FilterStrategy,
    /// Rules the filter is allowed to eliminate.
    eligible: HashSet<String>,
    pattern_count: usize,
}

impl LiteralPrefilter {
    pub fn from_rules(rules: &[Arc<CorrelationRule>]) -> Self {
        let mut patterns: Vec<String> = Vec::new();
        let mut eligible = HashSet::new();

        for rule in rules {
            if let RuleLogic::Simple(simple) = &rule.logic {
                if let Some(literals) = eligible_literals(simple) {
                    eligible.insert(rule.id.clone());
                    patterns.extend(literals);
                }
            }
        }
        patterns.sort();
        patterns.dedup();
        let pattern_count = patterns.len();

        let strategy = if pattern_count >= AHOCORASICK_THRESHOLD {
            match AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .match_kind(MatchKind::LeftmostFirst)
                .build(&patterns)
            {
                Ok(automaton) => FilterStrategy::AhoCorasick { automaton },
                // Automaton limits are far beyond any sane rule set;
                // degrade to the linear scan rather than fail the load.
                Err(_) => FilterStrategy::Simple { patterns },
            }
        } else {
            FilterStrategy::Simple { patterns }
        };

        LiteralPrefilter {
            strategy,
            eligible,
            pattern_count,
        }
    }

    /// Whether any harvested literal occurs in the event. `false` proves
    /// that no eligible rule can match.
    pub fn matches(&self, event: &Event) -> bool {
        if self.pattern_count == 0 {
            return false;
        }
        if self.check_str(&event.event_type) || self.check_str(&event.source) {
            return true;
        }
        event.fields.values().any(|value| self.check_value(value))
    }

    /// Whether the filter's verdict applies to this rule at all.
    pub fn covers(&self, rule_id: &str) -> bool {
        self.eligible.contains(rule_id)
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    pub fn eligible_rule_count(&self) -> usize {
        self.eligible.len()
    }

    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            FilterStrategy::Simple { .. } => "simple",
            FilterStrategy::AhoCorasick { .. } => "aho_corasick",
        }
    }

    fn check_str(&self, haystack: &str) -> bool {
        match &self.strategy {
            FilterStrategy::Simple { patterns } => {
                let lower = haystack.to_lowercase();
                patterns.iter().any(|p| lower.contains(p.as_str()))
            }
            FilterStrategy::AhoCorasick { automaton } => automaton.is_match(haystack),
        }
    }

    fn check_value(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.check_str(s),
            Value::Array(items) => items.iter().any(|v| self.check_value(v)),
            Value::Object(map) => map.values().any(|v| self.check_value(v)),
            _ => false,
        }
    }
}

/// Literals that make a simple rule safe to eliminate.
///
/// AND logic needs one literal-bearing condition; if that literal is
/// absent the conjunction fails. OR logic needs every branch literal,
/// otherwise a non-literal branch could still match.
fn eligible_literals(simple: &SimpleLogic) -> Option<Vec<String>> {
    if simple.conditions.is_empty() {
        return None;
    }
    match simple.combinator {
        Combinator::And => {
            let literals: Vec<String> = simple
                .conditions
                .iter()
                .filter_map(condition_literal)
                .take(1)
                .collect();
            if literals.is_empty() {
                None
            } else {
                Some(literals)
            }
        }
        Combinator::Or => {
            let mut literals = Vec::with_capacity(simple.conditions.len());
            for condition in &simple.conditions {
                literals.push(condition_literal(condition)?);
            }
            Some(literals)
        }
    }
}

fn condition_literal(condition: &crate::rules::Condition) -> Option<String> {
    match condition.operator {
        ConditionOperator::Equals | ConditionOperator::Contains => condition
            .value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase()),
        _ => None,
    }
}

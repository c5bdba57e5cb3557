//! Inverted rule index with a Bloom-filter front gate.
//!
//! Rules are bucketed under candidate keys derived from their logic so an
//! incoming event only pays for the rules that could possibly match it.
//! Keying is conservative: when no required constraint can be derived from
//! a rule, it lands in the catch-all bucket and is always a candidate. The
//! whole index is rebuilt as a fresh generation and swapped atomically, so
//! readers never see a half-built index.

use crate::event::Event;
use crate::rules::{CorrelationRule, RuleLogic, SimpleLogic, Combinator, ConditionOperator};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Fixed-size Bloom filter over index keys.
///
/// Sized for the rule-key population at build time; false positives only
/// cost a hash-map probe, false negatives cannot happen.
#[derive(Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// Build a filter for roughly `expected_items` keys at ~1% false
    /// positive rate.
    pub fn with_capacity(expected_items: usize) -> Self {
        // ~9.6 bits per item gives ~1% FP with 7 hash functions.
        let num_bits = (expected_items.max(8) * 10).next_power_of_two();
        BloomFilter {
            bits: vec![0u64; num_bits / 64],
            num_bits,
            num_hashes: 7,
        }
    }

    fn hash_pair(key: &str) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        key.hash(&mut h1);
        let mut h2 = DefaultHasher::new();
        // Second independent stream from a salted copy.
        0xb10cu16.hash(&mut h2);
        key.hash(&mut h2);
        (h1.finish(), h2.finish())
    }

    pub fn insert(&mut self, key: &str) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as usize;
            self.bits[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as usize;
            if self.bits[bit / 64] & (1u64 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }
}

/// One immutable build of the index.
struct Generation {
    rules: Vec<Arc<CorrelationRule>>,
    by_key: HashMap<String, Vec<usize>>,
    /// Rules with no derivable constraint; always candidates.
    catch_all: Vec<usize>,
    bloom: BloomFilter,
}

impl Generation {
    fn build(rules: Vec<CorrelationRule>) -> Self {
        let rules: Vec<Arc<CorrelationRule>> =
            rules.into_iter().filter(|r| r.enabled).map(Arc::new).collect();

        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        let mut catch_all = Vec::new();
        for (idx, rule) in rules.iter().enumerate() {
            let keys = candidate_keys(rule);
            if keys.is_empty() {
                catch_all.push(idx);
            } else {
                for key in keys {
                    by_key.entry(key).or_default().push(idx);
                }
            }
        }

        let mut bloom = BloomFilter::with_capacity(by_key.len());
        for key in by_key.keys() {
            bloom.insert(key);
        }

        Generation {
            rules,
            by_key,
            catch_all,
            bloom,
        }
    }
}

/// Keys under which a rule is indexed. An event must produce at least one
/// of these keys for the rule to possibly match; an empty set means no
/// such constraint exists.
fn candidate_keys(rule: &CorrelationRule) -> Vec<String> {
    match &rule.logic {
        RuleLogic::Simple(simple) => simple_keys(simple),
        RuleLogic::Threshold(threshold) => threshold
            .group_by
            .first()
            .map(|field| vec![field_key(field)])
            .unwrap_or_default(),
        RuleLogic::Sequence(sequence) => sequence
            .steps
            .iter()
            .map(|step| format!("type:{}", step.event_type))
            .collect(),
        RuleLogic::Complex(complex) => {
            // All fragments must match, so any one fragment's keys are a
            // sound constraint. Prefer the most selective source.
            if let Some(sequence) = &complex.sequence {
                return sequence
                    .steps
                    .iter()
                    .map(|step| format!("type:{}", step.event_type))
                    .collect();
            }
            if let Some(simple) = &complex.simple {
                let keys = simple_keys(simple);
                if !keys.is_empty() {
                    return keys;
                }
            }
            complex
                .threshold
                .as_ref()
                .and_then(|t| t.group_by.first())
                .map(|field| vec![field_key(field)])
                .unwrap_or_default()
        }
        RuleLogic::MlBased(ml) => vec![field_key(&ml.entity_id_field)],
    }
}

fn simple_keys(simple: &SimpleLogic) -> Vec<String> {
    match simple.combinator {
        Combinator::And => {
            // One required constraint suffices; prefer an exact
            // event_type, then source, then any field that must be
            // present for the condition to hold.
            for condition in &simple.conditions {
                if condition.operator == ConditionOperator::Equals {
                    if let Some(value) = condition.value.as_str() {
                        if condition.field == "event_type" {
                            return vec![format!("type:{value}")];
                        }
                        if condition.field == "source" {
                            return vec![format!("src:{value}")];
                        }
                    }
                }
            }
            simple
                .conditions
                .iter()
                .find(|c| c.operator != ConditionOperator::NotIn)
                .map(|c| vec![field_key(&c.field)])
                .unwrap_or_default()
        }
        Combinator::Or => {
            // Sound only when every branch carries the same kind of
            // exact constraint.
            let mut keys = Vec::with_capacity(simple.conditions.len());
            for condition in &simple.conditions {
                if condition.field == "event_type"
                    && condition.operator == ConditionOperator::Equals
                {
                    if let Some(value) = condition.value.as_str() {
                        keys.push(format!("type:{value}"));
                        continue;
                    }
                }
                return Vec::new();
            }
            keys
        }
    }
}

fn field_key(path: &str) -> String {
    let root = path.split('.').next().unwrap_or(path);
    format!("field:{root}")
}

/// Keys an event offers to the index.
fn event_keys(event: &Event) -> Vec<String> {
    let mut keys = Vec::with_capacity(event.fields.len() + 6);
    keys.push(format!("type:{}", event.event_type));
    keys.push(format!("src:{}", event.source));
    for name in ["id", "event_type", "source", "timestamp"] {
        keys.push(format!("field:{name}"));
    }
    for name in event.fields.keys() {
        keys.push(format!("field:{name}"));
    }
    keys
}

/// Concurrent rule index; lookups read the current generation, reloads
/// build and swap a new one.
pub struct RuleIndex {
    current: RwLock<Arc<Generation>>,
}

impl RuleIndex {
    pub fn new(rules: Vec<CorrelationRule>) -> Self {
        RuleIndex {
            current: RwLock::new(Arc::new(Generation::build(rules))),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Replace the whole rule set atomically.
    pub fn reload(&self, rules: Vec<CorrelationRule>) {
        let generation = Arc::new(Generation::build(rules));
        info!(
            rules = generation.rules.len(),
            keys = generation.by_key.len(),
            catch_all = generation.catch_all.len(),
            "rule index rebuilt"
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = generation;
    }

    /// Every enabled rule that could match this event: the catch-all set
    /// plus bucket hits, deduplicated, in stable rule order.
    pub fn applicable_rules(&self, event: &Event) -> Vec<Arc<CorrelationRule>> {
        let generation = Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()));

        let mut indices: Vec<usize> = generation.catch_all.clone();
        for key in event_keys(event) {
            // Bloom miss proves the bucket does not exist.
            if !generation.bloom.contains(&key) {
                continue;
            }
            if let Some(bucket) = generation.by_key.get(&key) {
                indices.extend_from_slice(bucket);
            }
        }
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .map(|idx| Arc::clone(&generation.rules[idx]))
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rules
            .len()
    }

    pub fn all_rules(&self) -> Vec<Arc<CorrelationRule>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rules
            .clone()
    }
}

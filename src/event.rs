//! Security event model.
//!
//! Events are immutable once ingested. Field access goes through dot-path
//! lookup over the typed field map, with the envelope columns (`id`,
//! `event_type`, `source`, `timestamp`) resolvable by name as well.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A single ingested security log event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique event identifier, assigned upstream.
    pub id: String,
    /// Event type identifier (e.g. "auth_failure", "process_start").
    pub event_type: String,
    /// Originating source (host, sensor, application).
    pub source: String,
    /// Event timestamp as reported by the source.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary typed payload fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Optional priority hint; higher is dispatched first when the
    /// priority queue is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl Event {
    /// Create an event with the current timestamp and an empty field map.
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            fields: Map::new(),
            priority: None,
        }
    }

    /// Builder-style field attachment.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Builder-style priority hint.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Builder-style timestamp override.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Enforce the ingest contract: id, event type and source must be
    /// present. Invalid events are rejected before reaching the engine.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidEvent("missing event id".to_string()));
        }
        if self.event_type.is_empty() {
            return Err(EngineError::InvalidEvent(format!(
                "event {} missing event_type",
                self.id
            )));
        }
        if self.source.is_empty() {
            return Err(EngineError::InvalidEvent(format!(
                "event {} missing source",
                self.id
            )));
        }
        Ok(())
    }

    /// Resolve a dot-path into the event.
    ///
    /// Envelope columns resolve by name; everything else traverses the
    /// field map. Missing paths yield `None` rather than an error so that
    /// conditions over absent fields simply evaluate false.
    pub fn field(&self, path: &str) -> Option<Value> {
        match path {
            "id" => return Some(Value::String(self.id.clone())),
            "event_type" => return Some(Value::String(self.event_type.clone())),
            "source" => return Some(Value::String(self.source.clone())),
            "timestamp" => return Some(Value::String(self.timestamp.to_rfc3339())),
            _ => {}
        }

        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current.clone())
    }

    /// True when the event carries a value at every one of the given paths.
    pub fn has_fields(&self, paths: &[String]) -> bool {
        paths.iter().all(|p| self.field(p).is_some())
    }

    /// Stable fingerprint over the referenced fields, used as the result
    /// cache key component. Paths are hashed in sorted order so the same
    /// (event, field set) pair always produces the same fingerprint.
    pub fn fingerprint(&self, paths: &[String]) -> u64 {
        let mut sorted: Vec<&String> = paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut hasher = DefaultHasher::new();
        self.event_type.hash(&mut hasher);
        self.source.hash(&mut hasher);
        for path in sorted {
            path.hash(&mut hasher);
            match self.field(path) {
                Some(value) => value.to_string().hash(&mut hasher),
                None => "\u{0}absent".hash(&mut hasher),
            }
        }
        hasher.finish()
    }

    /// Effective dispatch priority. Explicit hints win; otherwise a small
    /// set of well-known severity fields is consulted.
    pub fn effective_priority(&self) -> u8 {
        if let Some(p) = self.priority {
            return p;
        }
        match self.field("severity").and_then(|v| severity_rank(&v)) {
            Some(rank) => rank,
            None => 0,
        }
    }

    /// Compact summary persisted alongside threshold counters.
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            id: self.id.clone(),
            event_type: self.event_type.clone(),
            source: self.source.clone(),
            timestamp: self.timestamp,
        }
    }
}

fn severity_rank(value: &Value) -> Option<u8> {
    match value {
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "critical" => Some(4),
            "high" => Some(3),
            "medium" => Some(2),
            "low" => Some(1),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|v| v.min(u8::MAX as u64) as u8),
        _ => None,
    }
}

/// Minimal event summary recorded in correlation state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSummary {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

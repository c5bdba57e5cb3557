//! Error types for the correlation engine crate.

use std::fmt;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Rule payload failed load-time validation.
    InvalidRuleLogic(String),
    /// Rule document could not be parsed.
    RuleLoadError(String),
    /// Invalid regex pattern in a rule condition.
    InvalidRegex(String),
    /// Dot-path that cannot be resolved into an event.
    InvalidFieldPath(String),
    /// Event rejected by the ingest contract.
    InvalidEvent(String),
    /// Engine configuration out of bounds.
    ConfigError(String),
    /// The correlation store reported an error for a single operation.
    StoreError(String),
    /// The correlation store is unreachable; stateful rules degrade.
    StoreUnavailable,
    /// Per-event wall-clock budget exceeded.
    EvaluationTimeout,
    /// Circuit breaker is open; work was rejected at admission.
    EngineOverloaded,
    IoError(String),
    YamlError(String),
    JsonError(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidRuleLogic(msg) => write!(f, "Invalid rule logic: {msg}"),
            EngineError::RuleLoadError(msg) => write!(f, "Rule load error: {msg}"),
            EngineError::InvalidRegex(pattern) => write!(f, "Invalid regex pattern: {pattern}"),
            EngineError::InvalidFieldPath(path) => write!(f, "Invalid field path: {path}"),
            EngineError::InvalidEvent(msg) => write!(f, "Invalid event: {msg}"),
            EngineError::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            EngineError::StoreError(msg) => write!(f, "Correlation store error: {msg}"),
            EngineError::StoreUnavailable => write!(f, "Correlation store unavailable"),
            EngineError::EvaluationTimeout => write!(f, "Evaluation timeout exceeded"),
            EngineError::EngineOverloaded => write!(f, "Engine overloaded: admission rejected"),
            EngineError::IoError(msg) => write!(f, "IO error: {msg}"),
            EngineError::YamlError(msg) => write!(f, "YAML parsing error: {msg}"),
            EngineError::JsonError(msg) => write!(f, "JSON parsing error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::JsonError(err.to_string())
    }
}

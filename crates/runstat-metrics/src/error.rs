//! Errors raised when a handle is used incorrectly at update time.

use runstat_core::{ConfigurationError, MetricKind};
use thiserror::Error;

/// Result type for metric updates.
pub type MetricResult<T> = Result<T, MetricError>;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric {name} is a {kind}, cannot {operation}")]
    WrongKind {
        name: String,
        kind: MetricKind,
        operation: &'static str,
    },

    #[error("metric {name} expects labels {expected:?}, got {actual:?}")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("invalid value {value} for metric {name}")]
    InvalidValue { name: String, value: f64 },

    #[error("metric {0} belongs to a different registry")]
    ForeignHandle(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

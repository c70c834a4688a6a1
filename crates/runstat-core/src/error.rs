//! Configuration errors shared by every runstat crate.

use thiserror::Error;

use crate::types::MetricKind;

/// Result type alias for configuration-time operations.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Errors raised while declaring instruments or loading configuration.
///
/// All of these are fatal at startup: the host should abort initialization
/// rather than run with a half-declared metric set.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("metric {name} already registered as {existing}, requested {requested}")]
    IncompatibleKind {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("metric {name} already registered with labels {existing:?}, requested {requested:?}")]
    IncompatibleLabels {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    #[error("histogram {name} already registered with buckets {existing:?}, requested {requested:?}")]
    IncompatibleBuckets {
        name: String,
        existing: Vec<f64>,
        requested: Vec<f64>,
    },

    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),

    #[error("invalid label key {key:?} for metric {name}")]
    InvalidLabelKey { name: String, key: String },

    #[error("invalid histogram buckets for {name}: {reason}")]
    InvalidBuckets { name: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to read config: {0}")]
    Read(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

//! Point-in-time metric values handed to downstream reporters.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Integer(u64),
}

impl MetricValue {
    /// Value as a float.
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Float(v) => v,
            MetricValue::Integer(v) => v as f64,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Integer(v)
    }
}

/// A named series sample with tags and one or more values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub series: String,
    pub tags: BTreeMap<String, String>,
    pub values: BTreeMap<String, MetricValue>,
    /// Seconds since the Unix epoch at creation.
    pub timestamp: u64,
}

impl Metric {
    /// Create an empty metric stamped with the current time.
    pub fn new(series: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            tags: BTreeMap::new(),
            values: BTreeMap::new(),
            timestamp: epoch_secs(),
        }
    }

    /// Builder method: add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder method: add a value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Value under `key`.
    pub fn value(&self, key: &str) -> Option<MetricValue> {
        self.values.get(key).copied()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_values_untagged() {
        let metric = Metric::new("method_calls")
            .with_tag("method", "Foo#bar")
            .with_value("duration", 0.5)
            .with_value("call_count", 2u64);

        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["series"], "method_calls");
        assert_eq!(json["tags"]["method"], "Foo#bar");
        assert_eq!(json["values"]["duration"], 0.5);
        assert_eq!(json["values"]["call_count"], 2);
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn integer_values_convert_to_float() {
        assert_eq!(MetricValue::Integer(3).as_f64(), 3.0);
        assert_eq!(MetricValue::Float(0.25).as_f64(), 0.25);
    }
}

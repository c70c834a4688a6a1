use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a metric instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Name used in the `# TYPE` line of the text exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `name` is a valid metric name (`[a-zA-Z_:][a-zA-Z0-9_:]*`).
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Whether `key` is a valid label key (`[a-zA-Z_][a-zA-Z0-9_]*`, not `__`-prefixed).
pub fn is_valid_label_key(key: &str) -> bool {
    if key.starts_with("__") {
        return false;
    }
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names() {
        assert!(is_valid_metric_name("runtime_gc_time_total"));
        assert!(is_valid_metric_name("ns:sub_metric"));
        assert!(is_valid_metric_name("_private"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1metric"));
        assert!(!is_valid_metric_name("bad-name"));
        assert!(!is_valid_metric_name("with space"));
    }

    #[test]
    fn label_keys() {
        assert!(is_valid_label_key("method"));
        assert!(is_valid_label_key("_x1"));
        assert!(!is_valid_label_key("__reserved"));
        assert!(!is_valid_label_key("ns:key"));
        assert!(!is_valid_label_key("9lives"));
        assert!(!is_valid_label_key(""));
    }

    #[test]
    fn kind_display() {
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::Histogram.as_str(), "histogram");
    }
}

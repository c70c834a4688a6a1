//! Prometheus text exposition format.
//!
//! Renders gathered metric families into the Prometheus text exposition
//! format for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::labels::LabelSet;
use crate::registry::{MetricFamily, SeriesValue};

/// Render metric families into Prometheus text format.
///
/// Counters and gauges produce one line per series. Histograms produce
/// cumulative `_bucket` lines (ending with `le="+Inf"`) plus `_sum` and
/// `_count`.
pub fn render_prometheus(families: &[MetricFamily]) -> String {
    let mut out = String::new();

    for family in families {
        if !family.help.is_empty() {
            let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help));
        }
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind);

        for series in &family.series {
            match &series.value {
                SeriesValue::Counter(v) | SeriesValue::Gauge(v) => {
                    let _ = writeln!(
                        out,
                        "{}{} {}",
                        family.name,
                        render_labels(&series.labels, None),
                        format_value(*v)
                    );
                }
                SeriesValue::Histogram(h) => {
                    for (upper, cumulative) in &h.buckets {
                        let _ = writeln!(
                            out,
                            "{}_bucket{} {}",
                            family.name,
                            render_labels(&series.labels, Some(&format_value(*upper))),
                            cumulative
                        );
                    }
                    let _ = writeln!(
                        out,
                        "{}_bucket{} {}",
                        family.name,
                        render_labels(&series.labels, Some("+Inf")),
                        h.count
                    );
                    let labels = render_labels(&series.labels, None);
                    let _ = writeln!(out, "{}_sum{} {}", family.name, labels, format_value(h.sum));
                    let _ = writeln!(out, "{}_count{} {}", family.name, labels, h.count);
                }
            }
        }
    }

    out
}

/// `{k="v",...}`, with an optional trailing `le` label; empty when there
/// are no labels at all.
fn render_labels(labels: &LabelSet, le: Option<&str>) -> String {
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{le}\""));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

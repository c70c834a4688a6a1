//! runstat-metrics — the process-wide table of metric instruments.
//!
//! Instruments are declared once at startup and updated concurrently by
//! call recorders and samplers. Exporters read the whole table on demand
//! and render it in the Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! MetricRegistry
//!   ├── get_or_create() → MetricHandle   (idempotent, startup)
//!   ├── increment() / set() / observe()  (per-series atomic update)
//!   └── gather() → Vec<MetricFamily>     (read-only enumeration)
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```
//!
//! Series are never evicted. Every distinct label set creates a series that
//! lives as long as the registry, so label values must come from a bounded
//! domain.

pub mod error;
pub mod labels;
pub mod prometheus;
pub mod registry;

pub use error::{MetricError, MetricResult};
pub use labels::LabelSet;
pub use prometheus::render_prometheus;
pub use registry::{
    DEFAULT_BUCKETS, HistogramSnapshot, MetricFamily, MetricHandle, MetricRegistry,
    SeriesSnapshot, SeriesValue,
};
pub use runstat_core::{ConfigurationError, MetricKind};

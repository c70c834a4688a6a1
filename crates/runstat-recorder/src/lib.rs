//! runstat-recorder — timing of individual operations.
//!
//! A [`CallRecorder`] wraps one named operation (`Module#method`). Every
//! `measure` adds wall-clock and CPU time to the recorder's running totals
//! and publishes both durations into the shared registry's
//! `method_call_*_duration_seconds` histograms.
//!
//! # Architecture
//!
//! ```text
//! CallTracker (one per request / unit of work)
//!   └── CallRecorder per "Module#method"
//!         ├── measure() / measure_async() ← wraps host code
//!         ├── CallStats (atomic totals)
//!         └── CallHistograms → MetricRegistry
//! ```
//!
//! The wrapped operation's outcome is never touched: values (including
//! `Err`) are returned as-is and panics keep unwinding, with the timing
//! recorded on the way out.

pub mod clock;
pub mod metric;
pub mod recorder;
pub mod tracker;

pub use clock::RecorderError;
pub use metric::{Metric, MetricValue};
pub use recorder::{CallHistograms, CallRecorder, CallStats};
pub use tracker::CallTracker;

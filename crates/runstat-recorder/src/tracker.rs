//! Call tracker — the recorders of one unit of work.
//!
//! A host creates one tracker per request (or job), wraps the interesting
//! calls through it, and at the end asks for the metrics of every call
//! whose accumulated time crossed the threshold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::metric::Metric;
use crate::recorder::{CallHistograms, CallRecorder};

/// The call recorders of one request or job.
pub struct CallTracker {
    histograms: CallHistograms,
    threshold: Duration,
    /// "Module#method" → recorder.
    calls: Mutex<HashMap<String, Arc<CallRecorder>>>,
}

impl CallTracker {
    /// Create a tracker whose recorders share `histograms` and `threshold`.
    pub fn new(histograms: CallHistograms, threshold: Duration) -> Self {
        Self {
            histograms,
            threshold,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// The recorder for `module`/`method`, created on first use.
    pub fn method_call_for(&self, module: &str, method: &str) -> Arc<CallRecorder> {
        let recorder = CallRecorder::new(module, method, self.histograms.clone(), self.threshold);
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls
            .entry(recorder.name().to_string())
            .or_insert_with(|| Arc::new(recorder))
            .clone()
    }

    /// Shorthand for `method_call_for(module, method).measure(f)`.
    pub fn measure<T>(&self, module: &str, method: &str, f: impl FnOnce() -> T) -> T {
        self.method_call_for(module, method).measure(f)
    }

    /// Metrics of every call above its threshold, sorted by call name.
    pub fn metrics(&self) -> Vec<Metric> {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let mut above: Vec<&Arc<CallRecorder>> =
            calls.values().filter(|r| r.above_threshold()).collect();
        above.sort_by(|a, b| a.name().cmp(b.name()));
        above.into_iter().map(|r| r.to_metric()).collect()
    }

    /// Number of distinct calls seen.
    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if no call has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Call recorder — measures invocations of one named operation.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use runstat_core::{ConfigResult, MetricKind};
use runstat_metrics::{LabelSet, MetricHandle, MetricRegistry};
use tracing::{debug, warn};

use crate::clock::{CpuClock, thread_cpu_time};
use crate::metric::Metric;

/// Histogram of wall-clock time per recorded call.
pub const METHOD_CALL_REAL_DURATION: &str = "method_call_real_duration_seconds";
/// Histogram of CPU time per recorded call.
pub const METHOD_CALL_CPU_DURATION: &str = "method_call_cpu_duration_seconds";
/// Series name of [`CallRecorder::to_metric`].
pub const METHOD_CALLS_SERIES: &str = "method_calls";

/// The pair of histograms every recorder publishes into.
#[derive(Clone)]
pub struct CallHistograms {
    registry: Arc<MetricRegistry>,
    real: MetricHandle,
    cpu: MetricHandle,
}

impl CallHistograms {
    /// Declare the method call histograms, labeled `{module, method}`.
    pub fn register(registry: &Arc<MetricRegistry>) -> ConfigResult<Self> {
        let real = registry.get_or_create(
            METHOD_CALL_REAL_DURATION,
            MetricKind::Histogram,
            &["module", "method"],
            "Method calls real duration",
        )?;
        let cpu = registry.get_or_create(
            METHOD_CALL_CPU_DURATION,
            MetricKind::Histogram,
            &["module", "method"],
            "Method calls CPU duration",
        )?;
        Ok(Self {
            registry: registry.clone(),
            real,
            cpu,
        })
    }

    /// Registry the histograms live in.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    fn observe(&self, labels: &LabelSet, real: Duration, cpu: Duration) {
        if let Err(e) = self.registry.observe(&self.real, labels, real.as_secs_f64()) {
            warn!(error = %e, "failed to observe method call real duration");
        }
        if let Err(e) = self.registry.observe(&self.cpu, labels, cpu.as_secs_f64()) {
            warn!(error = %e, "failed to observe method call cpu duration");
        }
    }
}

/// Running totals for one recorder. Safe to update from many threads.
#[derive(Debug, Default)]
pub struct CallStats {
    call_count: AtomicU64,
    real_nanos: AtomicU64,
    cpu_nanos: AtomicU64,
}

impl CallStats {
    fn record(&self, real: Duration, cpu: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.real_nanos.fetch_add(saturating_nanos(real), Ordering::Relaxed);
        self.cpu_nanos.fetch_add(saturating_nanos(cpu), Ordering::Relaxed);
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Total wall-clock time in seconds.
    pub fn real_time(&self) -> f64 {
        nanos_to_secs(self.real_nanos.load(Ordering::Relaxed))
    }

    /// Total CPU time in seconds.
    pub fn cpu_time(&self) -> f64 {
        nanos_to_secs(self.cpu_nanos.load(Ordering::Relaxed))
    }

    fn real_nanos(&self) -> u64 {
        self.real_nanos.load(Ordering::Relaxed)
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn nanos_to_secs(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}

/// Measures invocations of one operation, named `<Module>#<method>`.
pub struct CallRecorder {
    name: String,
    labels: LabelSet,
    stats: CallStats,
    histograms: CallHistograms,
    threshold: Duration,
    cpu_clock: CpuClock,
}

impl CallRecorder {
    /// `method` may carry its own separator (`"#bar"`, `".bar"`); a bare
    /// name is treated as an instance method.
    pub fn new(
        module: &str,
        method: &str,
        histograms: CallHistograms,
        threshold: Duration,
    ) -> Self {
        let method = if method.starts_with('#') || method.starts_with('.') {
            method.to_string()
        } else {
            format!("#{method}")
        };
        Self {
            name: format!("{module}{method}"),
            labels: LabelSet::new().with("module", module).with("method", method),
            stats: CallStats::default(),
            histograms,
            threshold,
            cpu_clock: thread_cpu_time,
        }
    }

    /// Builder method: replace the CPU clock.
    pub fn with_cpu_clock(self, cpu_clock: CpuClock) -> Self {
        Self { cpu_clock, ..self }
    }

    /// `<Module>#<method>` name of the recorded operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `{module, method}` labels of the histograms.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Real time above which the call is reported.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Running totals.
    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    /// Run `f` and record its wall-clock and CPU time.
    ///
    /// Totals are updated on every exit path, including a panic unwinding
    /// out of `f`. The result of `f` is returned unchanged.
    pub fn measure<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut measurement = Measurement::start(self);
        measurement.resume();
        f()
    }

    /// Await `fut` and record its wall-clock time and the CPU time spent
    /// polling it.
    ///
    /// Wall time runs from this call, not from the first poll. Dropping the
    /// returned future before completion still records the call.
    pub fn measure_async<F: Future>(&self, fut: F) -> impl Future<Output = F::Output> {
        let mut measurement = Measurement::start(self);
        async move {
            let mut fut = std::pin::pin!(fut);
            let out = std::future::poll_fn(|cx| {
                measurement.resume();
                let poll = fut.as_mut().poll(cx);
                measurement.pause();
                poll
            })
            .await;
            drop(measurement);
            out
        }
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> u64 {
        self.stats.call_count()
    }

    /// Total wall-clock time in seconds.
    pub fn real_time(&self) -> f64 {
        self.stats.real_time()
    }

    /// Total CPU time in seconds.
    pub fn cpu_time(&self) -> f64 {
        self.stats.cpu_time()
    }

    /// Whether the total real time is strictly above the threshold.
    pub fn above_threshold(&self) -> bool {
        u128::from(self.stats.real_nanos()) > self.threshold.as_nanos()
    }

    /// Totals as a `method_calls` metric tagged with the call name.
    pub fn to_metric(&self) -> Metric {
        Metric::new(METHOD_CALLS_SERIES)
            .with_tag("method", self.name.clone())
            .with_value("duration", self.real_time())
            .with_value("cpu_duration", self.cpu_time())
            .with_value("call_count", self.call_count())
    }

    fn read_cpu(&self) -> Option<Duration> {
        match (self.cpu_clock)() {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(call = %self.name, error = %e, "recording zero cpu time");
                None
            }
        }
    }

    fn record(&self, real: Duration, cpu: Duration) {
        self.stats.record(real, cpu);
        self.histograms.observe(&self.labels, real, cpu);
    }
}

/// One in-flight invocation. Dropping it records the call.
struct Measurement<'a> {
    recorder: &'a CallRecorder,
    started: Instant,
    cpu: Duration,
    /// CPU clock reading at the start of the current on-CPU slice.
    cpu_mark: Option<Duration>,
}

impl<'a> Measurement<'a> {
    fn start(recorder: &'a CallRecorder) -> Self {
        Self {
            recorder,
            started: Instant::now(),
            cpu: Duration::ZERO,
            cpu_mark: None,
        }
    }

    fn resume(&mut self) {
        self.cpu_mark = self.recorder.read_cpu();
    }

    fn pause(&mut self) {
        if let Some(mark) = self.cpu_mark.take() {
            if let Some(now) = self.recorder.read_cpu() {
                self.cpu += now.saturating_sub(mark);
            }
        }
    }
}

impl Drop for Measurement<'_> {
    fn drop(&mut self) {
        self.pause();
        self.recorder.record(self.started.elapsed(), self.cpu);
    }
}

//! Sampler — one tick of runtime statistics collection.
//!
//! Each tick reads a [`SampleSnapshot`] through the sampler's probe and
//! publishes it as gauges. The lifecycle is `Idle → Running → Stopped`;
//! a stopped sampler never runs again.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use runstat_core::config::SamplerConfig;
use runstat_core::{ConfigResult, MetricKind};
use runstat_metrics::{LabelSet, MetricHandle, MetricRegistry};
use tracing::{debug, info, warn};

use crate::error::{SampleReadError, SamplerError, SamplerResult};
use crate::probe::{ProfilerScope, RuntimeProbe, SampleSnapshot};

/// Lifecycle of a [`Sampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for SamplerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SamplerState::Idle => "idle",
            SamplerState::Running => "running",
            SamplerState::Stopped => "stopped",
        })
    }
}

/// Outcome of one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub failures: Vec<SampleReadError>,
    /// Reads that produced a value.
    pub successful_reads: usize,
    /// Registry updates that were rejected.
    pub publish_errors: usize,
    pub duration: Duration,
}

impl TickReport {
    /// A tick fails when not a single read succeeded.
    pub fn failed(&self) -> bool {
        self.successful_reads == 0
    }
}

/// Instruments written by a sampler.
struct SamplerMetrics {
    duration: MetricHandle,
    gc_time: MetricHandle,
    gc_stat: MetricHandle,
    objects: MetricHandle,
    memory: MetricHandle,
    file_descriptors: MetricHandle,
}

impl SamplerMetrics {
    fn register(registry: &MetricRegistry, prefix: &str, worker_label: bool) -> ConfigResult<Self> {
        let name = |suffix: &str| format!("{prefix}_{suffix}");
        let duration_labels: &[&str] = if worker_label { &["worker"] } else { &[] };

        Ok(Self {
            duration: registry.get_or_create(
                &name("sampler_duration_seconds"),
                MetricKind::Histogram,
                duration_labels,
                "Sampler time",
            )?,
            gc_time: registry.get_or_create(
                &name("gc_time_total"),
                MetricKind::Gauge,
                &[],
                "Total GC time in seconds",
            )?,
            gc_stat: registry.get_or_create(
                &name("gc_stat"),
                MetricKind::Gauge,
                &["stat"],
                "Runtime collector and allocator counters",
            )?,
            objects: registry.get_or_create(
                &name("objects_total"),
                MetricKind::Gauge,
                &["type"],
                "Objects total",
            )?,
            memory: registry.get_or_create(
                &name("memory_usage_bytes"),
                MetricKind::Gauge,
                &[],
                "Memory used total",
            )?,
            file_descriptors: registry.get_or_create(
                &name("file_descriptors_total"),
                MetricKind::Gauge,
                &[],
                "File descriptors total",
            )?,
        })
    }
}

/// Periodically reads runtime counters through a probe and publishes them.
pub struct Sampler {
    name: String,
    probe: Arc<dyn RuntimeProbe>,
    registry: Arc<MetricRegistry>,
    metrics: SamplerMetrics,
    config: SamplerConfig,
    duration_labels: LabelSet,
    state: Mutex<SamplerState>,
    consecutive_failures: AtomicU32,
    ticks: AtomicU64,
    /// Held for the whole tick so two ticks never interleave.
    tick_lock: Mutex<()>,
}

impl Sampler {
    /// Create a sampler and declare its instruments.
    ///
    /// Fails on an invalid `config` or an instrument that conflicts with
    /// one already in `registry`.
    pub fn new(
        name: impl Into<String>,
        probe: Arc<dyn RuntimeProbe>,
        registry: Arc<MetricRegistry>,
        config: SamplerConfig,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let metrics = SamplerMetrics::register(&registry, &config.prefix, config.worker.is_some())?;
        let duration_labels = match &config.worker {
            Some(worker) => LabelSet::new().with("worker", worker.clone()),
            None => LabelSet::new(),
        };

        Ok(Self {
            name: name.into(),
            probe,
            registry,
            metrics,
            config,
            duration_labels,
            state: Mutex::new(SamplerState::Idle),
            consecutive_failures: AtomicU32::new(0),
            ticks: AtomicU64::new(0),
            tick_lock: Mutex::new(()),
        })
    }

    /// Name the sampler is registered and logged under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time between two ticks.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SamplerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the sampler is in the `Running` state.
    pub fn is_running(&self) -> bool {
        self.state() == SamplerState::Running
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// `Idle → Running`.
    pub fn start(&self) -> SamplerResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SamplerState::Idle {
            return Err(SamplerError::InvalidTransition {
                name: self.name.clone(),
                state: *state,
                action: "start",
            });
        }
        *state = SamplerState::Running;
        info!(
            sampler = %self.name,
            probe = self.probe.name(),
            interval_secs = self.config.interval.as_secs_f64(),
            "sampler started"
        );
        Ok(())
    }

    /// `Running → Stopped`. Stopping a stopped sampler is a no-op.
    pub fn stop(&self) -> SamplerResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SamplerState::Running => {
                *state = SamplerState::Stopped;
                info!(sampler = %self.name, "sampler stopped");
                Ok(())
            }
            SamplerState::Stopped => Ok(()),
            SamplerState::Idle => Err(SamplerError::InvalidTransition {
                name: self.name.clone(),
                state: SamplerState::Idle,
                action: "stop",
            }),
        }
    }

    /// Force `Stopped` after the sampler's task died.
    pub(crate) fn halt(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SamplerState::Running {
            *state = SamplerState::Stopped;
        }
    }

    /// Record the outcome of a tick; returns the state afterwards.
    ///
    /// `max_consecutive_failures` failed ticks in a row stop the sampler.
    pub fn note_tick(&self, ok: bool) -> SamplerState {
        if ok {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return self.state();
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.max_consecutive_failures {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SamplerState::Running {
                *state = SamplerState::Stopped;
                warn!(
                    sampler = %self.name,
                    failures,
                    "sampler stopped after repeated failed ticks"
                );
            }
            return *state;
        }
        self.state()
    }

    /// Run one tick: read every counter, publish it, time the tick.
    pub fn sample(&self) -> TickReport {
        let _serial = self.tick_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();
        let _profiler = ProfilerScope::enter(self.probe.as_ref());

        let snapshot = self.probe.snapshot(self.config.enable_object_sampling);
        let mut report = TickReport {
            successful_reads: snapshot.successful_reads(),
            ..TickReport::default()
        };

        self.sample_gc(&snapshot, &mut report);
        self.sample_objects(&snapshot, &mut report);
        if let Some(bytes) = snapshot.memory_bytes {
            self.set_gauge(&self.metrics.memory, &LabelSet::new(), bytes as f64, &mut report);
        }
        if let Some(fds) = snapshot.file_descriptors {
            self.set_gauge(&self.metrics.file_descriptors, &LabelSet::new(), fds as f64, &mut report);
        }

        for failure in &snapshot.failures {
            warn!(sampler = %self.name, error = %failure, "sample read failed");
        }
        report.failures = snapshot.failures;

        report.duration = started.elapsed();
        if let Err(e) = self.registry.observe(
            &self.metrics.duration,
            &self.duration_labels,
            report.duration.as_secs_f64(),
        ) {
            warn!(sampler = %self.name, error = %e, "failed to observe sampler duration");
            report.publish_errors += 1;
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        debug!(
            sampler = %self.name,
            reads = report.successful_reads,
            failures = report.failures.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "sampler tick complete"
        );
        report
    }

    fn sample_gc(&self, snapshot: &SampleSnapshot, report: &mut TickReport) {
        let Some(gc) = &snapshot.gc else {
            return;
        };
        if let Some(total) = gc.total_time {
            self.set_gauge(&self.metrics.gc_time, &LabelSet::new(), total.as_secs_f64(), report);
        }
        for (key, value) in &gc.counters {
            let labels = LabelSet::new().with("stat", key.clone());
            self.set_gauge(&self.metrics.gc_stat, &labels, *value as f64, report);
        }
    }

    fn sample_objects(&self, snapshot: &SampleSnapshot, report: &mut TickReport) {
        let Some(objects) = &snapshot.objects else {
            return;
        };
        for (type_name, count) in objects {
            let labels = LabelSet::new().with("type", type_name.clone());
            self.set_gauge(&self.metrics.objects, &labels, *count as f64, report);
        }
    }

    fn set_gauge(&self, handle: &MetricHandle, labels: &LabelSet, value: f64, report: &mut TickReport) {
        if let Err(e) = self.registry.set(handle, labels, value) {
            warn!(sampler = %self.name, metric = handle.name(), error = %e, "failed to publish sample");
            report.publish_errors += 1;
        }
    }
}

//! Metric registry — named instruments and their labeled series.
//!
//! Scalar series (counters and gauges) store an `f64` as raw bits in an
//! `AtomicU64` and never take a lock on update. Histogram series hold a
//! per-series mutex. The family and series maps sit behind read/write
//! locks that are only written when a name or label set is seen for the
//! first time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use runstat_core::{ConfigResult, ConfigurationError, MetricKind, is_valid_label_key, is_valid_metric_name};
use tracing::debug;

use crate::error::{MetricError, MetricResult};
use crate::labels::LabelSet;

/// Default histogram layout, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// An `f64` updated atomically through its bit pattern.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn add(&self, delta: f64) {
        // The closure always returns Some, so this never fails.
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

/// Per-bucket (non-cumulative) counts; the last slot is the `+Inf` bucket.
struct HistogramState {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new(bucket_count: usize) -> Self {
        Self {
            counts: vec![0; bucket_count + 1],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, bounds: &[f64], value: f64) {
        let idx = bounds
            .iter()
            .position(|upper| value <= *upper)
            .unwrap_or(bounds.len());
        self.counts[idx] += 1;
        self.sum += value;
        self.count += 1;
    }

    fn snapshot(&self, bounds: &[f64]) -> HistogramSnapshot {
        let mut cumulative = 0;
        let buckets = bounds
            .iter()
            .zip(&self.counts)
            .map(|(upper, n)| {
                cumulative += n;
                (*upper, cumulative)
            })
            .collect();
        HistogramSnapshot {
            buckets,
            sum: self.sum,
            count: self.count,
        }
    }
}

enum Series {
    Scalar(AtomicF64),
    Histogram(Mutex<HistogramState>),
}

/// One named instrument and all of its series.
struct Family {
    registry_id: u64,
    name: String,
    kind: MetricKind,
    label_keys: Vec<String>,
    help: String,
    buckets: Vec<f64>,
    series: RwLock<HashMap<LabelSet, Arc<Series>>>,
}

impl Family {
    fn new_series(&self) -> Series {
        match self.kind {
            MetricKind::Counter | MetricKind::Gauge => Series::Scalar(AtomicF64::new(0.0)),
            MetricKind::Histogram => {
                Series::Histogram(Mutex::new(HistogramState::new(self.buckets.len())))
            }
        }
    }

    fn check_compatible(
        &self,
        kind: MetricKind,
        label_keys: &[String],
        buckets: &[f64],
    ) -> ConfigResult<()> {
        if self.kind != kind {
            return Err(ConfigurationError::IncompatibleKind {
                name: self.name.clone(),
                existing: self.kind,
                requested: kind,
            });
        }
        if sorted(&self.label_keys) != sorted(label_keys) {
            return Err(ConfigurationError::IncompatibleLabels {
                name: self.name.clone(),
                existing: self.label_keys.clone(),
                requested: label_keys.to_vec(),
            });
        }
        if self.buckets != buckets {
            return Err(ConfigurationError::IncompatibleBuckets {
                name: self.name.clone(),
                existing: self.buckets.clone(),
                requested: buckets.to_vec(),
            });
        }
        Ok(())
    }
}

fn sorted(keys: &[String]) -> Vec<&str> {
    let mut v: Vec<&str> = keys.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

/// Identifies one instrument in a [`MetricRegistry`].
///
/// Handles are cheap to clone. Two handles are equal iff they refer to the
/// same instrument.
#[derive(Clone)]
pub struct MetricHandle {
    family: Arc<Family>,
}

impl MetricHandle {
    /// Metric name.
    pub fn name(&self) -> &str {
        &self.family.name
    }

    /// Instrument kind.
    pub fn kind(&self) -> MetricKind {
        self.family.kind
    }

    /// Label keys in declaration order.
    pub fn label_keys(&self) -> &[String] {
        &self.family.label_keys
    }

    /// Help text shown in the exposition.
    pub fn help(&self) -> &str {
        &self.family.help
    }

    /// Bucket upper bounds; empty for counters and gauges.
    pub fn buckets(&self) -> &[f64] {
        &self.family.buckets
    }
}

impl PartialEq for MetricHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.family, &other.family)
    }
}

impl Eq for MetricHandle {}

impl fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricHandle")
            .field("name", &self.family.name)
            .field("kind", &self.family.kind)
            .field("label_keys", &self.family.label_keys)
            .finish()
    }
}

/// Point-in-time value of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)` per declared bucket. The implicit
    /// `+Inf` bucket equals `count`.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub labels: LabelSet,
    pub value: SeriesValue,
}

/// One instrument and the current value of each of its series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_keys: Vec<String>,
    /// Sorted by label set.
    pub series: Vec<SeriesSnapshot>,
}

/// Process-wide table of metric instruments.
///
/// Constructed explicitly at startup and shared by `Arc` with every
/// recorder, sampler and exporter.
pub struct MetricRegistry {
    id: u64,
    families: RwLock<BTreeMap<String, Arc<Family>>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            families: RwLock::new(BTreeMap::new()),
        }
    }

    /// Declare an instrument, or return the existing one under `name`.
    ///
    /// Histograms get [`DEFAULT_BUCKETS`]. Fails if `name` is already
    /// registered with a different kind or label keys.
    pub fn get_or_create(
        &self,
        name: &str,
        kind: MetricKind,
        label_keys: &[&str],
        help: &str,
    ) -> ConfigResult<MetricHandle> {
        let buckets = match kind {
            MetricKind::Histogram => DEFAULT_BUCKETS.to_vec(),
            MetricKind::Counter | MetricKind::Gauge => Vec::new(),
        };
        self.declare(name, kind, label_keys, help, buckets)
    }

    /// Declare a histogram with custom bucket upper bounds.
    pub fn get_or_create_histogram(
        &self,
        name: &str,
        label_keys: &[&str],
        help: &str,
        buckets: &[f64],
    ) -> ConfigResult<MetricHandle> {
        validate_buckets(name, buckets)?;
        self.declare(name, MetricKind::Histogram, label_keys, help, buckets.to_vec())
    }

    fn declare(
        &self,
        name: &str,
        kind: MetricKind,
        label_keys: &[&str],
        help: &str,
        buckets: Vec<f64>,
    ) -> ConfigResult<MetricHandle> {
        if !is_valid_metric_name(name) {
            return Err(ConfigurationError::InvalidMetricName(name.to_string()));
        }
        let label_keys = validate_label_keys(name, kind, label_keys)?;

        if let Some(family) = read(&self.families).get(name) {
            family.check_compatible(kind, &label_keys, &buckets)?;
            return Ok(MetricHandle {
                family: family.clone(),
            });
        }

        let mut families = write(&self.families);
        // Another caller may have declared it between the two locks.
        if let Some(family) = families.get(name) {
            family.check_compatible(kind, &label_keys, &buckets)?;
            return Ok(MetricHandle {
                family: family.clone(),
            });
        }

        let family = Arc::new(Family {
            registry_id: self.id,
            name: name.to_string(),
            kind,
            label_keys,
            help: help.to_string(),
            buckets,
            series: RwLock::new(HashMap::new()),
        });
        families.insert(name.to_string(), family.clone());
        debug!(metric = %name, %kind, "metric registered");
        Ok(MetricHandle { family })
    }

    /// Look up an already declared instrument.
    pub fn handle(&self, name: &str) -> Option<MetricHandle> {
        read(&self.families)
            .get(name)
            .map(|family| MetricHandle {
                family: family.clone(),
            })
    }

    /// Add `delta` to a counter series.
    pub fn increment(&self, handle: &MetricHandle, labels: &LabelSet, delta: f64) -> MetricResult<()> {
        self.expect_kind(handle, MetricKind::Counter, "increment")?;
        if !delta.is_finite() || delta < 0.0 {
            return Err(MetricError::InvalidValue {
                name: handle.name().to_string(),
                value: delta,
            });
        }
        if let Series::Scalar(v) = &*self.series(handle, labels)? {
            v.add(delta);
        }
        Ok(())
    }

    /// Set a gauge series to `value`.
    pub fn set(&self, handle: &MetricHandle, labels: &LabelSet, value: f64) -> MetricResult<()> {
        self.expect_kind(handle, MetricKind::Gauge, "set")?;
        if let Series::Scalar(v) = &*self.series(handle, labels)? {
            v.store(value);
        }
        Ok(())
    }

    /// Record one observation in a histogram series.
    pub fn observe(&self, handle: &MetricHandle, labels: &LabelSet, value: f64) -> MetricResult<()> {
        self.expect_kind(handle, MetricKind::Histogram, "observe")?;
        if value.is_nan() {
            return Err(MetricError::InvalidValue {
                name: handle.name().to_string(),
                value,
            });
        }
        if let Series::Histogram(h) = &*self.series(handle, labels)? {
            h.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(&handle.family.buckets, value);
        }
        Ok(())
    }

    /// Current value of a counter or gauge series, if it exists.
    pub fn value(&self, handle: &MetricHandle, labels: &LabelSet) -> Option<f64> {
        match &*self.existing_series(handle, labels)? {
            Series::Scalar(v) => Some(v.load()),
            Series::Histogram(_) => None,
        }
    }

    /// Current state of a histogram series, if it exists.
    pub fn histogram(&self, handle: &MetricHandle, labels: &LabelSet) -> Option<HistogramSnapshot> {
        match &*self.existing_series(handle, labels)? {
            Series::Histogram(h) => Some(
                h.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot(&handle.family.buckets),
            ),
            Series::Scalar(_) => None,
        }
    }

    /// Read every instrument and series, sorted by name then label set.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let families: Vec<Arc<Family>> = read(&self.families).values().cloned().collect();

        families
            .into_iter()
            .map(|family| {
                let mut series: Vec<SeriesSnapshot> = read(&family.series)
                    .iter()
                    .map(|(labels, s)| SeriesSnapshot {
                        labels: labels.clone(),
                        value: match (&**s, family.kind) {
                            (Series::Scalar(v), MetricKind::Counter) => SeriesValue::Counter(v.load()),
                            (Series::Scalar(v), _) => SeriesValue::Gauge(v.load()),
                            (Series::Histogram(h), _) => SeriesValue::Histogram(
                                h.lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .snapshot(&family.buckets),
                            ),
                        },
                    })
                    .collect();
                series.sort_by(|a, b| a.labels.cmp(&b.labels));

                MetricFamily {
                    name: family.name.clone(),
                    help: family.help.clone(),
                    kind: family.kind,
                    label_keys: family.label_keys.clone(),
                    series,
                }
            })
            .collect()
    }

    /// Number of declared instruments.
    pub fn len(&self) -> usize {
        read(&self.families).len()
    }

    /// Check if no metric has been declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expect_kind(&self, handle: &MetricHandle, kind: MetricKind, operation: &'static str) -> MetricResult<()> {
        if handle.family.registry_id != self.id {
            return Err(MetricError::ForeignHandle(handle.name().to_string()));
        }
        if handle.kind() != kind {
            return Err(MetricError::WrongKind {
                name: handle.name().to_string(),
                kind: handle.kind(),
                operation,
            });
        }
        Ok(())
    }

    fn series(&self, handle: &MetricHandle, labels: &LabelSet) -> MetricResult<Arc<Series>> {
        let family = &handle.family;
        if !labels.matches_keys(&family.label_keys) {
            return Err(MetricError::LabelMismatch {
                name: family.name.clone(),
                expected: family.label_keys.clone(),
                actual: labels.keys().map(str::to_string).collect(),
            });
        }

        if let Some(series) = read(&family.series).get(labels) {
            return Ok(series.clone());
        }

        let mut map = write(&family.series);
        let series = map
            .entry(labels.clone())
            .or_insert_with(|| Arc::new(family.new_series()))
            .clone();
        Ok(series)
    }

    fn existing_series(&self, handle: &MetricHandle, labels: &LabelSet) -> Option<Arc<Series>> {
        if handle.family.registry_id != self.id {
            return None;
        }
        read(&handle.family.series).get(labels).cloned()
    }
}

fn validate_label_keys(name: &str, kind: MetricKind, keys: &[&str]) -> ConfigResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        let reserved = kind == MetricKind::Histogram && *key == "le";
        if !is_valid_label_key(key) || reserved || out.iter().any(|k| k == key) {
            return Err(ConfigurationError::InvalidLabelKey {
                name: name.to_string(),
                key: key.to_string(),
            });
        }
        out.push(key.to_string());
    }
    Ok(out)
}

fn validate_buckets(name: &str, buckets: &[f64]) -> ConfigResult<()> {
    let reason = if buckets.is_empty() {
        Some("at least one bucket is required")
    } else if buckets.iter().any(|b| !b.is_finite()) {
        Some("bucket bounds must be finite")
    } else if buckets.windows(2).any(|w| w[0] >= w[1]) {
        Some("bucket bounds must be strictly increasing")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigurationError::InvalidBuckets {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

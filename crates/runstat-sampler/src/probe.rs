//! Runtime probes — uniform access to host runtime counters.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::SampleReadError;

/// Collector (or allocator) counters of the host runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcStats {
    /// Total time spent collecting, when the runtime has a collector.
    pub total_time: Option<Duration>,
    pub counters: BTreeMap<String, u64>,
}

/// One tick's worth of runtime readings.
///
/// A field is `None` when its read failed (the error is in `failures`) or,
/// for `objects`, when the probe has no object tracking or object sampling
/// was not requested.
#[derive(Debug, Default)]
pub struct SampleSnapshot {
    pub gc: Option<GcStats>,
    pub objects: Option<BTreeMap<String, u64>>,
    pub memory_bytes: Option<u64>,
    pub file_descriptors: Option<u64>,
    pub failures: Vec<SampleReadError>,
}

impl SampleSnapshot {
    /// Number of reads that produced a value.
    pub fn successful_reads(&self) -> usize {
        usize::from(self.gc.is_some())
            + usize::from(self.objects.is_some())
            + usize::from(self.memory_bytes.is_some())
            + usize::from(self.file_descriptors.is_some())
    }
}

/// Access to the counters of one host runtime.
///
/// Implementations must not fail as a whole: every read reports its own
/// error, and a missing capability is `Ok(None)` or
/// [`SampleReadError::Unsupported`].
pub trait RuntimeProbe: Send + Sync {
    fn name(&self) -> &str;

    fn gc_stats(&self) -> Result<GcStats, SampleReadError>;

    /// Live object counts by type name, or `None` without object tracking.
    fn object_counts(&self) -> Result<Option<BTreeMap<String, u64>>, SampleReadError> {
        Ok(None)
    }

    /// Resident memory in bytes.
    fn memory_usage(&self) -> Result<u64, SampleReadError>;

    fn file_descriptor_count(&self) -> Result<u64, SampleReadError>;

    /// Drop any per-tick profiling state.
    fn clear_profiler(&self) {}

    fn snapshot(&self, include_objects: bool) -> SampleSnapshot {
        read_snapshot(self, include_objects)
    }
}

/// Run every read of `probe` independently and collect the results.
pub fn read_snapshot<P: RuntimeProbe + ?Sized>(probe: &P, include_objects: bool) -> SampleSnapshot {
    let mut snapshot = SampleSnapshot::default();

    match probe.gc_stats() {
        Ok(gc) => snapshot.gc = Some(gc),
        Err(e) => snapshot.failures.push(e),
    }
    if include_objects {
        match probe.object_counts() {
            Ok(objects) => snapshot.objects = objects,
            Err(e) => snapshot.failures.push(e),
        }
    }
    match probe.memory_usage() {
        Ok(bytes) => snapshot.memory_bytes = Some(bytes),
        Err(e) => snapshot.failures.push(e),
    }
    match probe.file_descriptor_count() {
        Ok(n) => snapshot.file_descriptors = Some(n),
        Err(e) => snapshot.failures.push(e),
    }

    snapshot
}

/// Clears the probe's profiler state when dropped.
pub struct ProfilerScope<'a> {
    probe: &'a dyn RuntimeProbe,
}

impl<'a> ProfilerScope<'a> {
    /// Start a tick; the profiler is cleared when the scope drops.
    pub fn enter(probe: &'a dyn RuntimeProbe) -> Self {
        Self { probe }
    }
}

impl Drop for ProfilerScope<'_> {
    fn drop(&mut self) {
        self.probe.clear_profiler();
    }
}

//! Test double for [`RuntimeProbe`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::SampleReadError;
use crate::probe::{GcStats, RuntimeProbe, SampleSnapshot, read_snapshot};

pub(crate) struct ScriptedProbe {
    pub fail_gc: bool,
    pub fail_memory: bool,
    pub fail_fds: bool,
    pub gc_counters: BTreeMap<String, u64>,
    pub objects: Option<BTreeMap<String, u64>>,
    /// Time each snapshot takes.
    pub delay: Duration,
    /// Panic during the snapshot with this 1-based number.
    pub panic_on: Option<u64>,
    pub snapshots: AtomicU64,
    pub completed: AtomicU64,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub cleared: AtomicU64,
}

impl ScriptedProbe {
    pub fn healthy() -> Self {
        Self {
            fail_gc: false,
            fail_memory: false,
            fail_fds: false,
            gc_counters: BTreeMap::from([
                ("count".to_string(), 42),
                ("heap_live_slots".to_string(), 9000),
            ]),
            objects: Some(BTreeMap::from([
                ("Session".to_string(), 3),
                ("String".to_string(), 120),
            ])),
            delay: Duration::ZERO,
            panic_on: None,
            snapshots: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cleared: AtomicU64::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_gc: true,
            fail_memory: true,
            fail_fds: true,
            objects: None,
            ..Self::healthy()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::healthy()
        }
    }
}

fn io_error(what: &'static str) -> SampleReadError {
    SampleReadError::Io {
        what,
        reason: "scripted failure".to_string(),
    }
}

impl RuntimeProbe for ScriptedProbe {
    fn name(&self) -> &str {
        "scripted"
    }

    fn gc_stats(&self) -> Result<GcStats, SampleReadError> {
        if self.fail_gc {
            return Err(io_error("gc stats"));
        }
        Ok(GcStats {
            total_time: Some(Duration::from_millis(1500)),
            counters: self.gc_counters.clone(),
        })
    }

    fn object_counts(&self) -> Result<Option<BTreeMap<String, u64>>, SampleReadError> {
        Ok(self.objects.clone())
    }

    fn memory_usage(&self) -> Result<u64, SampleReadError> {
        if self.fail_memory {
            return Err(io_error("memory usage"));
        }
        Ok(64 * 1024 * 1024)
    }

    fn file_descriptor_count(&self) -> Result<u64, SampleReadError> {
        if self.fail_fds {
            return Err(SampleReadError::Unsupported {
                what: "file descriptor count",
            });
        }
        Ok(12)
    }

    fn clear_profiler(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self, include_objects: bool) -> SampleSnapshot {
        let n = self.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_on == Some(n) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            panic!("scripted probe panic on snapshot {n}");
        }

        let snapshot = read_snapshot(self, include_objects);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        snapshot
    }
}

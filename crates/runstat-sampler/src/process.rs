//! Native process probe.
//!
//! Reads resident memory and open descriptors from procfs on Linux,
//! scheduler and paging counters from `getrusage`, and allocator counters
//! when [`CountingAllocator`] is the global allocator. A native process has
//! no garbage collector, so `total_time` is always `None`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::alloc::CountingAllocator;
use crate::error::SampleReadError;
use crate::objects::ObjectTracker;
use crate::probe::{GcStats, RuntimeProbe};

const DEFAULT_PAGE_SIZE: u64 = 4096;

/// [`RuntimeProbe`] for the current native process.
pub struct ProcessProbe {
    /// procfs directory of the sampled process; `None` where procfs does
    /// not exist.
    proc_root: Option<PathBuf>,
    /// `proc_root` is this process, so listing its `fd` directory opens
    /// one extra descriptor that must not be counted.
    lists_own_fds: bool,
    objects: Option<ObjectTracker>,
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe {
    /// Create a probe for the current process.
    pub fn new() -> Self {
        let proc_root = if cfg!(target_os = "linux") {
            Some(PathBuf::from("/proc/self"))
        } else {
            None
        };
        Self {
            lists_own_fds: proc_root.is_some(),
            proc_root,
            objects: None,
        }
    }

    /// Builder method: report live object counts from `tracker`.
    pub fn with_object_tracker(self, tracker: ObjectTracker) -> Self {
        Self {
            objects: Some(tracker),
            ..self
        }
    }

    /// Builder method: read procfs files from `root` instead of `/proc/self`.
    pub fn with_proc_root(self, root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: Some(root.into()),
            lists_own_fds: false,
            ..self
        }
    }

    fn proc_root(&self, what: &'static str) -> Result<&PathBuf, SampleReadError> {
        self.proc_root
            .as_ref()
            .ok_or(SampleReadError::Unsupported { what })
    }
}

impl RuntimeProbe for ProcessProbe {
    fn name(&self) -> &str {
        "process"
    }

    fn gc_stats(&self) -> Result<GcStats, SampleReadError> {
        let mut counters = rusage_counters()?;
        if CountingAllocator::is_active() {
            counters.extend(CountingAllocator::stats().counters());
        }
        Ok(GcStats {
            total_time: None,
            counters,
        })
    }

    fn object_counts(&self) -> Result<Option<BTreeMap<String, u64>>, SampleReadError> {
        Ok(self.objects.as_ref().map(ObjectTracker::counts))
    }

    fn memory_usage(&self) -> Result<u64, SampleReadError> {
        const WHAT: &str = "memory usage";
        let path = self.proc_root(WHAT)?.join("statm");
        let content = fs::read_to_string(&path).map_err(|e| SampleReadError::Io {
            what: WHAT,
            reason: format!("{}: {e}", path.display()),
        })?;
        let resident_pages = parse_statm_resident(&content).ok_or_else(|| SampleReadError::Parse {
            what: WHAT,
            reason: format!("unexpected statm content {:?}", content.trim()),
        })?;
        Ok(resident_pages * page_size())
    }

    fn file_descriptor_count(&self) -> Result<u64, SampleReadError> {
        const WHAT: &str = "file descriptor count";
        let path = self.proc_root(WHAT)?.join("fd");
        let entries = fs::read_dir(&path).map_err(|e| SampleReadError::Io {
            what: WHAT,
            reason: format!("{}: {e}", path.display()),
        })?;
        let listed = entries.filter(|e| e.is_ok()).count() as u64;
        Ok(listed.saturating_sub(u64::from(self.lists_own_fds)))
    }

    fn clear_profiler(&self) {
        if CountingAllocator::is_active() {
            CountingAllocator::reset_peak();
        }
    }
}

/// Second field of `/proc/<pid>/statm`: resident set size in pages.
fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

fn page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as u64;
        }
        debug!("sysconf(_SC_PAGESIZE) failed, assuming {DEFAULT_PAGE_SIZE}");
    }
    DEFAULT_PAGE_SIZE
}

#[cfg(unix)]
fn rusage_counters() -> Result<BTreeMap<String, u64>, SampleReadError> {
    // SAFETY: rusage is plain old data; all-zero is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a valid, writable rusage for the duration of the call.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return Err(SampleReadError::Io {
            what: "resource usage",
            reason: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(BTreeMap::from([
        ("minor_page_faults".to_string(), usage.ru_minflt as u64),
        ("major_page_faults".to_string(), usage.ru_majflt as u64),
        ("voluntary_context_switches".to_string(), usage.ru_nvcsw as u64),
        ("involuntary_context_switches".to_string(), usage.ru_nivcsw as u64),
    ]))
}

#[cfg(not(unix))]
fn rusage_counters() -> Result<BTreeMap<String, u64>, SampleReadError> {
    Ok(BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("statm"), "12345 2048 300 10 0 900 0\n").unwrap();
        let fd = dir.path().join("fd");
        fs::create_dir(&fd).unwrap();
        for n in 0..5 {
            fs::write(fd.join(n.to_string()), "").unwrap();
        }
        dir
    }

    #[test]
    fn parse_statm_values() {
        assert_eq!(parse_statm_resident("12345 2048 300 10 0 900 0"), Some(2048));
        assert_eq!(parse_statm_resident("12345"), None);
        assert_eq!(parse_statm_resident("a b c"), None);
    }

    #[test]
    fn reads_fake_procfs() {
        let dir = fake_proc();
        let probe = ProcessProbe::new().with_proc_root(dir.path());
        assert_eq!(probe.memory_usage().unwrap(), 2048 * page_size());
        assert_eq!(probe.file_descriptor_count().unwrap(), 5);
    }

    #[test]
    fn own_listing_descriptor_is_not_counted() {
        let dir = fake_proc();
        let probe = ProcessProbe {
            proc_root: Some(dir.path().to_path_buf()),
            lists_own_fds: true,
            objects: None,
        };
        assert_eq!(probe.file_descriptor_count().unwrap(), 4);
    }

    #[test]
    fn missing_fd_dir_is_an_io_error() {
        let dir = fake_proc();
        fs::remove_dir_all(dir.path().join("fd")).unwrap();
        let probe = ProcessProbe::new().with_proc_root(dir.path());
        assert!(matches!(
            probe.file_descriptor_count(),
            Err(SampleReadError::Io { what: "file descriptor count", .. })
        ));
        // Memory still reads.
        assert!(probe.memory_usage().is_ok());
    }

    #[test]
    fn garbage_statm_is_a_parse_error() {
        let dir = fake_proc();
        fs::write(dir.path().join("statm"), "garbage").unwrap();
        let probe = ProcessProbe::new().with_proc_root(dir.path());
        assert!(matches!(
            probe.memory_usage(),
            Err(SampleReadError::Parse { .. })
        ));
    }

    #[test]
    fn no_procfs_is_unsupported() {
        let probe = ProcessProbe {
            proc_root: None,
            lists_own_fds: false,
            objects: None,
        };
        assert!(matches!(
            probe.memory_usage(),
            Err(SampleReadError::Unsupported { .. })
        ));
        assert!(matches!(
            probe.file_descriptor_count(),
            Err(SampleReadError::Unsupported { .. })
        ));
    }

    #[test]
    fn object_counts_need_a_tracker() {
        let probe = ProcessProbe::new();
        assert_eq!(probe.object_counts().unwrap(), None);

        let tracker = ObjectTracker::new();
        let _token = tracker.track_named("Session");
        let probe = ProcessProbe::new().with_object_tracker(tracker);
        let counts = probe.object_counts().unwrap().unwrap();
        assert_eq!(counts["Session"], 1);
    }

    #[cfg(unix)]
    #[test]
    fn gc_stats_report_rusage() {
        let stats = ProcessProbe::new().gc_stats().unwrap();
        assert_eq!(stats.total_time, None);
        assert!(stats.counters.contains_key("minor_page_faults"));
        assert!(stats.counters.contains_key("voluntary_context_switches"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_own_process() {
        let probe = ProcessProbe::new();
        assert!(probe.memory_usage().unwrap() > 0);
        assert!(probe.file_descriptor_count().unwrap() > 0);
    }
}

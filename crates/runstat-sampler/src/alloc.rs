//! Counting global allocator.
//!
//! Install it in the host binary to expose allocator activity as runtime
//! counters:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: runstat_sampler::CountingAllocator = runstat_sampler::CountingAllocator;
//! ```
//!
//! The counters are process-wide statics because the global allocator is.

use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static REALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static BYTES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static BYTES_FREED: AtomicU64 = AtomicU64::new(0);
static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_LIVE_BYTES: AtomicU64 = AtomicU64::new(0);

/// [`System`] allocator wrapper that counts every allocation.
pub struct CountingAllocator;

fn on_alloc(size: usize) {
    let size = size as u64;
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    BYTES_ALLOCATED.fetch_add(size, Ordering::Relaxed);
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed).wrapping_add(size);
    PEAK_LIVE_BYTES.fetch_max(live, Ordering::Relaxed);
}

fn on_free(size: usize) {
    let size = size as u64;
    DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    BYTES_FREED.fetch_add(size, Ordering::Relaxed);
    LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded with the caller's guarantees.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded with the caller's guarantees.
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: forwarded with the caller's guarantees.
        unsafe { System.dealloc(ptr, layout) };
        on_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: forwarded with the caller's guarantees.
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            let old = layout.size() as u64;
            let new = new_size as u64;
            REALLOCATIONS.fetch_add(1, Ordering::Relaxed);
            BYTES_FREED.fetch_add(old, Ordering::Relaxed);
            BYTES_ALLOCATED.fetch_add(new, Ordering::Relaxed);
            let live = if new >= old {
                LIVE_BYTES.fetch_add(new - old, Ordering::Relaxed).wrapping_add(new - old)
            } else {
                LIVE_BYTES.fetch_sub(old - new, Ordering::Relaxed).wrapping_sub(old - new)
            };
            PEAK_LIVE_BYTES.fetch_max(live, Ordering::Relaxed);
        }
        new_ptr
    }
}

/// Allocator counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub reallocations: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    pub live_bytes: u64,
    /// Highest live byte count since the last [`CountingAllocator::reset_peak`].
    pub peak_live_bytes: u64,
}

impl AllocatorStats {
    /// Counters keyed by the `stat` label they are published under.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("allocations".to_string(), self.allocations),
            ("deallocations".to_string(), self.deallocations),
            ("reallocations".to_string(), self.reallocations),
            ("allocated_bytes".to_string(), self.bytes_allocated),
            ("freed_bytes".to_string(), self.bytes_freed),
            ("live_bytes".to_string(), self.live_bytes),
            ("peak_live_bytes".to_string(), self.peak_live_bytes),
        ])
    }
}

impl CountingAllocator {
    /// Read every allocator counter.
    pub fn stats() -> AllocatorStats {
        AllocatorStats {
            allocations: ALLOCATIONS.load(Ordering::Relaxed),
            deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
            reallocations: REALLOCATIONS.load(Ordering::Relaxed),
            bytes_allocated: BYTES_ALLOCATED.load(Ordering::Relaxed),
            bytes_freed: BYTES_FREED.load(Ordering::Relaxed),
            live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
            peak_live_bytes: PEAK_LIVE_BYTES.load(Ordering::Relaxed),
        }
    }

    /// Whether anything has been allocated through this allocator, i.e.
    /// whether it is installed as the global allocator.
    pub fn is_active() -> bool {
        ALLOCATIONS.load(Ordering::Relaxed) > 0
    }

    /// Start a new peak window at the current live byte count.
    pub fn reset_peak() {
        PEAK_LIVE_BYTES.store(LIVE_BYTES.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_direct_allocations() {
        let before = CountingAllocator::stats();
        let layout = Layout::from_size_align(256, 8).unwrap();
        // SAFETY: layout has non-zero size; the pointer is freed with the same layout.
        unsafe {
            let ptr = CountingAllocator.alloc(layout);
            assert!(!ptr.is_null());
            let ptr = CountingAllocator.realloc(ptr, layout, 512);
            assert!(!ptr.is_null());
            CountingAllocator.dealloc(ptr, Layout::from_size_align(512, 8).unwrap());
        }
        let after = CountingAllocator::stats();

        assert!(after.allocations > before.allocations);
        assert!(after.reallocations > before.reallocations);
        assert!(after.deallocations > before.deallocations);
        assert!(after.bytes_allocated >= before.bytes_allocated + 256 + 512);
        assert!(after.bytes_freed >= before.bytes_freed + 256 + 512);
        assert!(CountingAllocator::is_active());
    }

    #[test]
    fn counters_have_stable_names() {
        let counters = AllocatorStats::default().counters();
        assert_eq!(counters.len(), 7);
        assert!(counters.contains_key("allocations"));
        assert!(counters.contains_key("peak_live_bytes"));
    }
}

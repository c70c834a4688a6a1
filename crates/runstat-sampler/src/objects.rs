//! Opt-in live object tracking by type.
//!
//! Rust has no heap walker, so object counts only cover types whose
//! construction the host routes through an [`ObjectTracker`].

use std::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared table of live object counts, keyed by type name.
#[derive(Clone, Default)]
pub struct ObjectTracker {
    counts: Arc<Mutex<HashMap<String, Arc<AtomicU64>>>>,
}

impl ObjectTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one live `T` until the returned token is dropped.
    pub fn track<T: ?Sized>(&self) -> ObjectToken {
        self.track_named(type_name::<T>())
    }

    /// Count one live object under an explicit type name.
    pub fn track_named(&self, name: &str) -> ObjectToken {
        let counter = {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            counts
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .clone()
        };
        counter.fetch_add(1, Ordering::Relaxed);
        ObjectToken { counter }
    }

    /// Wrap `value` so it is counted for as long as it lives.
    pub fn wrap<T>(&self, value: T) -> Tracked<T> {
        Tracked {
            value,
            _token: self.track::<T>(),
        }
    }

    /// Current count for every type seen so far, including zeros.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts
            .iter()
            .map(|(name, n)| (name.clone(), n.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Keeps one object counted; decrements on drop.
pub struct ObjectToken {
    counter: Arc<AtomicU64>,
}

impl Drop for ObjectToken {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A value counted by an [`ObjectTracker`].
pub struct Tracked<T> {
    value: T,
    _token: ObjectToken,
}

impl<T> Tracked<T> {
    /// Unwrap the value; it stops being counted.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Session;

    #[test]
    fn tokens_count_live_objects() {
        let tracker = ObjectTracker::new();
        let a = tracker.track::<Session>();
        let b = tracker.track::<Session>();
        let name = type_name::<Session>();
        assert_eq!(tracker.counts()[name], 2);

        drop(a);
        assert_eq!(tracker.counts()[name], 1);
        drop(b);
        // Types stay listed at zero so their gauge drops too.
        assert_eq!(tracker.counts()[name], 0);
    }

    #[test]
    fn wrapped_values_are_counted() {
        let tracker = ObjectTracker::new();
        let mut list = tracker.wrap(vec![1, 2, 3]);
        list.push(4);
        assert_eq!(list.len(), 4);
        assert_eq!(tracker.counts()[type_name::<Vec<i32>>()], 1);

        let inner = list.into_inner();
        assert_eq!(inner, vec![1, 2, 3, 4]);
        assert_eq!(tracker.counts()[type_name::<Vec<i32>>()], 0);
    }

    #[test]
    fn clones_share_counts() {
        let tracker = ObjectTracker::new();
        let clone = tracker.clone();
        let _token = clone.track_named("Symbol");
        assert_eq!(tracker.counts()["Symbol"], 1);
    }
}

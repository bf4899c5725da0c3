//! src/coordinate/debouncer.rs
//! ============================================================================
//! # Debouncer: Per-Key Fixed-Width Coalescing Window
//!
//! Suppresses duplicate triggers that share a key within a time window. This
//! is deliberately dumber than the admission controller: the only state is
//! "when was the last accepted trigger per key", and there is no escalating
//! backoff.
//!
//! Un-keyed triggers (`None`) are fail-open — always accepted, never
//! recorded — because silently dropping an undebounceable change is worse
//! than one extra refresh.
//!
//! Every operation has an `_at(now)` variant taking an explicit timestamp so
//! the tick loop and tests can drive time deterministically.

use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

/// Per-key time-window suppression of duplicate triggers.
pub struct Debouncer<K> {
    last_accepted: Mutex<FxHashMap<K, Instant>>,
}

impl<K: Hash + Eq + Clone> Debouncer<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_accepted: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns true and records the trigger iff `window` has elapsed since
    /// the last accepted trigger for this key (or no record exists).
    /// A `None` key always returns true.
    pub fn should_process(&self, key: Option<&K>, window: Duration) -> bool {
        self.should_process_at(key, window, Instant::now())
    }

    /// Explicit-time variant of [`Self::should_process`].
    pub fn should_process_at(&self, key: Option<&K>, window: Duration, now: Instant) -> bool {
        let Some(key) = key else {
            trace!("un-keyed trigger accepted (fail-open)");
            return true;
        };

        let mut map = self.last_accepted.lock();
        match map.get(key) {
            Some(&last) if now.saturating_duration_since(last) < window => {
                trace!("trigger suppressed inside debounce window");
                false
            }
            _ => {
                map.insert(key.clone(), now);
                true
            }
        }
    }

    /// Forget the recorded timestamp for one key, e.g. on an explicit
    /// user-driven action that should bypass suppression.
    pub fn reset(&self, key: &K) {
        self.last_accepted.lock().remove(key);
    }

    /// Forget all recorded timestamps.
    pub fn reset_all(&self) {
        self.last_accepted.lock().clear();
    }

    /// Number of keys with a recorded acceptance.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.last_accepted.lock().len()
    }
}

impl<K: Hash + Eq + Clone> Default for Debouncer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for Debouncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(250);

    #[test]
    fn window_suppresses_then_reopens() {
        let debouncer: Debouncer<u64> = Debouncer::new();
        let t0 = Instant::now();

        assert!(debouncer.should_process_at(Some(&7), WINDOW, t0));
        assert!(!debouncer.should_process_at(Some(&7), WINDOW, t0 + Duration::from_millis(100)));
        assert!(debouncer.should_process_at(Some(&7), WINDOW, t0 + Duration::from_millis(260)));
    }

    #[test]
    fn keys_are_independent() {
        let debouncer: Debouncer<u64> = Debouncer::new();
        let t0 = Instant::now();

        assert!(debouncer.should_process_at(Some(&1), WINDOW, t0));
        assert!(debouncer.should_process_at(Some(&2), WINDOW, t0));
        assert!(!debouncer.should_process_at(Some(&1), WINDOW, t0 + Duration::from_millis(10)));
    }

    #[test]
    fn absent_key_is_fail_open() {
        let debouncer: Debouncer<u64> = Debouncer::new();
        let t0 = Instant::now();

        assert!(debouncer.should_process_at(None, WINDOW, t0));
        assert!(debouncer.should_process_at(None, WINDOW, t0));
        assert_eq!(debouncer.tracked_keys(), 0);
    }

    #[test]
    fn reset_reopens_the_window() {
        let debouncer: Debouncer<u64> = Debouncer::new();
        let t0 = Instant::now();

        assert!(debouncer.should_process_at(Some(&3), WINDOW, t0));
        assert!(!debouncer.should_process_at(Some(&3), WINDOW, t0 + Duration::from_millis(50)));

        debouncer.reset(&3);
        assert!(debouncer.should_process_at(Some(&3), WINDOW, t0 + Duration::from_millis(60)));

        debouncer.reset_all();
        assert_eq!(debouncer.tracked_keys(), 0);
    }
}

//! src/coordinate/admission.rs
//! ============================================================================
//! # RefreshAdmissionController: Adaptive Backoff + Global Refresh Section
//!
//! Two responsibilities, both about deciding whether a refresh may run now:
//!
//! 1. **Per-key adaptive backoff.** Bursts of legitimate rapid changes are
//!    admitted at the base interval, but sustained rapid fire grows the
//!    interval proportionally to the consecutive-grant count, clamped to a
//!    hard cap. A quiet period relaxes the interval back to base.
//! 2. **A single global non-reentrant "refresh in progress" section.**
//!    Acquired via [`RefreshAdmissionController::begin_refresh`], released by
//!    dropping the returned [`RefreshGuard`] — release happens on every exit
//!    path, including panics. A section held past the stale timeout is
//!    treated as leaked and reclaimed (logged as an anomaly, never fatal).
//!
//! All refresh-in-progress state lives here. Call sites must not keep their
//! own `is_refreshing` booleans around this controller.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::AdmissionConfig;

/// Per-key refresh bookkeeping.
#[derive(Debug, Clone, Copy)]
struct RefreshStats {
    last_refresh_at: Instant,
    consecutive_count: u32,
    adaptive_interval: Duration,
}

impl RefreshStats {
    fn fresh(now: Instant, base: Duration) -> Self {
        Self {
            last_refresh_at: now,
            consecutive_count: 1,
            adaptive_interval: base,
        }
    }
}

/// Point-in-time view of one key's backoff state.
#[derive(Debug, Clone, Copy)]
pub struct RefreshStatsSnapshot {
    pub consecutive_count: u32,
    pub adaptive_interval: Duration,
}

/// Global refresh section state. At most one logical refresh at a time; the
/// epoch ties a [`RefreshGuard`] to the acquisition it came from so a guard
/// whose section was reclaimed cannot release its successor.
#[derive(Debug, Clone, Copy)]
enum SectionState {
    Idle,
    Refreshing { started_at: Instant, epoch: u64 },
}

/// Per-key adaptive-backoff admission control plus the global non-reentrant
/// refresh section.
pub struct RefreshAdmissionController<K> {
    cfg: AdmissionConfig,
    stats: Mutex<FxHashMap<K, RefreshStats>>,
    section: Mutex<SectionState>,
    next_epoch: AtomicU64,
    reclaimed: AtomicU64,
}

impl<K: Hash + Eq + Clone> RefreshAdmissionController<K> {
    #[must_use]
    pub fn new(cfg: AdmissionConfig) -> Self {
        Self {
            cfg,
            stats: Mutex::new(FxHashMap::default()),
            section: Mutex::new(SectionState::Idle),
            next_epoch: AtomicU64::new(1),
            reclaimed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.cfg
    }

    /// Decide whether a refresh keyed by `key` is currently permitted.
    ///
    /// `force` resets the key to baseline and grants immediately. A `None`
    /// key is fail-open: granted, with no bookkeeping.
    pub fn can_refresh(&self, key: Option<&K>, force: bool) -> bool {
        self.can_refresh_at(key, force, Instant::now())
    }

    /// Explicit-time variant of [`Self::can_refresh`].
    pub fn can_refresh_at(&self, key: Option<&K>, force: bool, now: Instant) -> bool {
        let Some(key) = key else {
            return true;
        };

        let mut stats = self.stats.lock();
        let entry = match stats.entry(key.clone()) {
            std::collections::hash_map::Entry::Vacant(vacant) => {
                // First refresh for this key: grant at baseline.
                vacant.insert(RefreshStats::fresh(now, self.cfg.base_interval));
                return true;
            }
            std::collections::hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
        };

        if force {
            *entry = RefreshStats::fresh(now, self.cfg.base_interval);
            return true;
        }

        let elapsed = now.saturating_duration_since(entry.last_refresh_at);

        // Quiet period passed: relax back to baseline before evaluating.
        if elapsed >= self.cfg.quiet_period {
            *entry = RefreshStats::fresh(now, self.cfg.base_interval);
            return true;
        }

        if elapsed < entry.adaptive_interval {
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = entry.adaptive_interval.as_millis() as u64,
                "refresh denied inside adaptive interval"
            );
            return false;
        }

        entry.last_refresh_at = now;
        entry.consecutive_count += 1;

        if entry.consecutive_count > self.cfg.burst_threshold {
            let grown = self
                .cfg
                .base_interval
                .saturating_mul(entry.consecutive_count);
            entry.adaptive_interval = grown.min(self.cfg.max_interval).max(self.cfg.base_interval);
            debug!(
                consecutive = entry.consecutive_count,
                interval_ms = entry.adaptive_interval.as_millis() as u64,
                "burst detected, adaptive interval grown"
            );
        }

        true
    }

    /// Enter the global refresh section. `None` when a refresh is already in
    /// progress and still within the stale timeout. A section older than the
    /// timeout is reclaimed: the leaked holder is logged and the caller is
    /// granted a fresh acquisition.
    pub fn begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.begin_refresh_at(Instant::now())
    }

    /// Explicit-time variant of [`Self::begin_refresh`].
    pub fn begin_refresh_at(&self, now: Instant) -> Option<RefreshGuard<'_>> {
        let mut section = self.section.lock();
        match *section {
            SectionState::Idle => Some(self.acquire(&mut section, now)),
            SectionState::Refreshing { started_at, .. } => {
                let age = now.saturating_duration_since(started_at);
                if age <= self.cfg.stale_timeout {
                    debug!(
                        age_ms = age.as_millis() as u64,
                        "refresh denied: section already held"
                    );
                    None
                } else {
                    self.reclaimed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        age_ms = age.as_millis() as u64,
                        "stale refresh section reclaimed"
                    );
                    Some(self.acquire(&mut section, now))
                }
            }
        }
    }

    fn acquire<'a>(&'a self, section: &mut SectionState, now: Instant) -> RefreshGuard<'a> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        *section = SectionState::Refreshing {
            started_at: now,
            epoch,
        };
        RefreshGuard {
            section: &self.section,
            epoch,
        }
    }

    /// Age out a leaked section without wanting to refresh; called from the
    /// host tick loop.
    pub fn age_stale_at(&self, now: Instant) {
        let mut section = self.section.lock();
        if let SectionState::Refreshing { started_at, .. } = *section {
            let age = now.saturating_duration_since(started_at);
            if age > self.cfg.stale_timeout {
                self.reclaimed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    age_ms = age.as_millis() as u64,
                    "stale refresh section aged out"
                );
                *section = SectionState::Idle;
            }
        }
    }

    /// Whether the global section is currently held.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.section.lock(), SectionState::Refreshing { .. })
    }

    /// How many leaked sections have been reclaimed so far.
    #[must_use]
    pub fn reclaimed_count(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    /// Current backoff state for a key, if any refresh was granted for it.
    #[must_use]
    pub fn stats_for(&self, key: &K) -> Option<RefreshStatsSnapshot> {
        self.stats.lock().get(key).map(|s| RefreshStatsSnapshot {
            consecutive_count: s.consecutive_count,
            adaptive_interval: s.adaptive_interval,
        })
    }

    /// Drop the backoff record for one key.
    pub fn reset(&self, key: &K) {
        self.stats.lock().remove(key);
    }

    /// Drop all backoff records.
    pub fn reset_all(&self) {
        self.stats.lock().clear();
    }
}

impl<K> std::fmt::Debug for RefreshAdmissionController<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshAdmissionController")
            .field("cfg", &self.cfg)
            .field("section", &*self.section.lock())
            .finish_non_exhaustive()
    }
}

/// Scoped handle to the global refresh section; releases on drop, on every
/// exit path. If the section was reclaimed while this guard was held, the
/// drop leaves the successor's acquisition untouched.
#[must_use = "dropping the guard ends the refresh section"]
pub struct RefreshGuard<'a> {
    section: &'a Mutex<SectionState>,
    epoch: u64,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut section = self.section.lock();
        match *section {
            SectionState::Refreshing { epoch, .. } if epoch == self.epoch => {
                *section = SectionState::Idle;
            }
            _ => {
                debug!("refresh guard dropped after its section was reclaimed");
            }
        }
    }
}

impl std::fmt::Debug for RefreshGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshGuard")
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AdmissionConfig {
        AdmissionConfig {
            base_interval: Duration::from_millis(250),
            max_interval: Duration::from_millis(5000),
            burst_threshold: 3,
            quiet_period: Duration::from_millis(2000),
            stale_timeout: Duration::from_millis(10_000),
        }
    }

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn backoff_grows_during_burst_and_resets_after_quiet_period() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();
        let base = Duration::from_millis(250);

        let mut last_interval = Duration::ZERO;
        for i in 0..4u32 {
            let now = t0 + base * i;
            assert!(ctl.can_refresh_at(Some(&9), false, now), "call {i} denied");

            let snap = ctl.stats_for(&9).expect("stats recorded");
            assert!(snap.adaptive_interval >= last_interval, "interval shrank");
            last_interval = snap.adaptive_interval;
        }

        // 4th grant exceeded the burst threshold of 3.
        let snap = ctl.stats_for(&9).expect("stats recorded");
        assert_eq!(snap.consecutive_count, 4);
        assert!(snap.adaptive_interval > base);
        assert!(snap.adaptive_interval <= cfg().max_interval);

        // Quiet period elapses: back to baseline.
        let quiet = t0 + base * 3 + Duration::from_millis(2100);
        assert!(ctl.can_refresh_at(Some(&9), false, quiet));
        let snap = ctl.stats_for(&9).expect("stats recorded");
        assert_eq!(snap.consecutive_count, 1);
        assert_eq!(snap.adaptive_interval, base);
    }

    #[test]
    fn denies_inside_adaptive_interval() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();

        assert!(ctl.can_refresh_at(Some(&1), false, t0));
        assert!(!ctl.can_refresh_at(Some(&1), false, t0 + 100 * MS));
        assert!(ctl.can_refresh_at(Some(&1), false, t0 + 260 * MS));
    }

    #[test]
    fn force_resets_to_base_and_grants() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();

        // Build up a burst so the interval has grown.
        for i in 0..5u32 {
            ctl.can_refresh_at(Some(&2), false, t0 + Duration::from_millis(250) * i);
        }
        let grown = ctl.stats_for(&2).expect("stats").adaptive_interval;
        assert!(grown > Duration::from_millis(250));

        // Forced refresh immediately after a grant would otherwise be denied.
        let now = t0 + Duration::from_millis(250) * 4 + 10 * MS;
        assert!(ctl.can_refresh_at(Some(&2), true, now));
        let snap = ctl.stats_for(&2).expect("stats");
        assert_eq!(snap.adaptive_interval, Duration::from_millis(250));
        assert_eq!(snap.consecutive_count, 1);
    }

    #[test]
    fn interval_never_exceeds_cap() {
        let mut c = cfg();
        c.max_interval = Duration::from_millis(800);
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(c);
        let t0 = Instant::now();

        let mut now = t0;
        for _ in 0..20 {
            if ctl.can_refresh_at(Some(&3), false, now) {
                let snap = ctl.stats_for(&3).expect("stats");
                assert!(snap.adaptive_interval <= Duration::from_millis(800));
            }
            // Always step past the current interval so grants keep landing
            // within the quiet period.
            now += Duration::from_millis(900);
        }
    }

    #[test]
    fn absent_key_is_fail_open() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();

        assert!(ctl.can_refresh_at(None, false, t0));
        assert!(ctl.can_refresh_at(None, false, t0));
    }

    #[test]
    fn section_is_non_reentrant_within_timeout() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();

        let guard = ctl.begin_refresh_at(t0);
        assert!(guard.is_some());
        assert!(ctl.is_refreshing());

        // Second attempt while held and fresh: denied.
        assert!(ctl.begin_refresh_at(t0 + 100 * MS).is_none());

        drop(guard);
        assert!(!ctl.is_refreshing());
        assert!(ctl.begin_refresh_at(t0 + 200 * MS).is_some());
    }

    #[test]
    fn stale_section_is_reclaimed_exactly_once() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();

        let leaked = ctl.begin_refresh_at(t0);
        assert!(leaked.is_some());

        let past_timeout = t0 + Duration::from_millis(10_001);
        let second = ctl.begin_refresh_at(past_timeout);
        assert!(second.is_some(), "stale section must be reclaimed");
        assert_eq!(ctl.reclaimed_count(), 1);

        // The reclaim granted one acquisition, not two.
        assert!(ctl.begin_refresh_at(past_timeout + MS).is_none());

        // The leaked guard drops late; it must not release the new section.
        drop(leaked);
        assert!(ctl.is_refreshing());

        drop(second);
        assert!(!ctl.is_refreshing());
    }

    #[test]
    fn tick_ages_out_a_leaked_section() {
        let ctl: RefreshAdmissionController<u64> = RefreshAdmissionController::new(cfg());
        let t0 = Instant::now();

        let leaked = ctl.begin_refresh_at(t0);
        std::mem::forget(leaked);

        ctl.age_stale_at(t0 + Duration::from_millis(5000));
        assert!(ctl.is_refreshing(), "young section must survive aging");

        ctl.age_stale_at(t0 + Duration::from_millis(10_001));
        assert!(!ctl.is_refreshing());
        assert_eq!(ctl.reclaimed_count(), 1);
    }
}

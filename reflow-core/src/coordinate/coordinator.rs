//! src/coordinate/coordinator.rs
//! ============================================================================
//! # Coordinator: Composition Root for the Coordination Core
//!
//! Owns the bus, the debouncer, the admission controller, and the derived
//! layout cache. There are no process-wide singletons: a host constructs one
//! `Coordinator` and hands it to consumers by reference.
//!
//! [`Coordinator::fire_if_permitted`] is the guarded publish path: a trigger
//! reaches the bus only when both the debounce window and the admission
//! controller grant it, and the global refresh section is released on every
//! exit path via the guard's drop. Denial is a silent no-op, not an error.
//!
//! [`Coordinator::tick`] is the host's once-per-frame entry point: it ages
//! out leaked refresh sections and re-checks host-reported viewport
//! dimensions for cache invalidation.

use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::bus::event::{Event, EventBuilder, EventKind};
use crate::bus::event_bus::EventBus;
use crate::cache::layout_cache::DerivedLayoutCache;
use crate::config::Config;

use super::admission::RefreshAdmissionController;
use super::debouncer::Debouncer;

/// Debounce/admission key; typically a collection id.
pub type RefreshKey = u64;

/// Composes the bus, debouncer, admission controller, and layout cache.
pub struct Coordinator {
    config: Config,
    bus: EventBus,
    debouncer: Debouncer<RefreshKey>,
    admission: RefreshAdmissionController<RefreshKey>,
    layout: Mutex<DerivedLayoutCache>,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let admission = RefreshAdmissionController::new(config.admission.clone());
        let layout = Mutex::new(DerivedLayoutCache::new(&config.cache));

        Self {
            config,
            bus: EventBus::new(),
            debouncer: Debouncer::new(),
            admission,
            layout,
        }
    }

    /// The bus, for registration and for non-debounced direct posts.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub const fn debouncer(&self) -> &Debouncer<RefreshKey> {
        &self.debouncer
    }

    #[must_use]
    pub const fn admission(&self) -> &RefreshAdmissionController<RefreshKey> {
        &self.admission
    }

    /// Exclusive access to the derived layout cache. The host tick loop is
    /// the expected single caller; the lock keeps occasional off-loop access
    /// safe.
    pub fn layout(&self) -> MutexGuard<'_, DerivedLayoutCache> {
        self.layout.lock()
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Build and post an event iff both the debounce window and the
    /// admission controller grant it. Returns whether the event was posted.
    ///
    /// The refresh section is held across build and post, and released when
    /// the guard drops — on the success path, on the denial paths, and if
    /// the builder panics.
    pub fn fire_if_permitted<F>(&self, kind: EventKind, key: Option<RefreshKey>, build: F) -> bool
    where
        F: FnOnce(EventBuilder) -> Event,
    {
        self.fire_if_permitted_at(kind, key, build, Instant::now())
    }

    /// Explicit-time variant of [`Self::fire_if_permitted`].
    pub fn fire_if_permitted_at<F>(
        &self,
        kind: EventKind,
        key: Option<RefreshKey>,
        build: F,
        now: Instant,
    ) -> bool
    where
        F: FnOnce(EventBuilder) -> Event,
    {
        let key_ref = key.as_ref();

        if !self
            .debouncer
            .should_process_at(key_ref, self.config.debounce.window, now)
        {
            trace!(kind = kind.name(), "fire suppressed by debounce window");
            return false;
        }

        if !self.admission.can_refresh_at(key_ref, false, now) {
            trace!(kind = kind.name(), "fire denied by admission control");
            return false;
        }

        let Some(_guard) = self.admission.begin_refresh_at(now) else {
            debug!(kind = kind.name(), "fire denied: refresh already running");
            return false;
        };

        let event = build(Event::builder(kind));
        self.bus.post(&event);
        true
        // _guard drops here, releasing the refresh section.
    }

    /// Host tick entry point, called once per frame. Ages out stale refresh
    /// sections and applies viewport drift to the layout cache. Returns true
    /// when the viewport changed.
    pub fn tick(&self, viewport: (u16, u16)) -> bool {
        self.tick_at(Instant::now(), viewport)
    }

    /// Explicit-time variant of [`Self::tick`].
    pub fn tick_at(&self, now: Instant, viewport: (u16, u16)) -> bool {
        self.admission.age_stale_at(now);
        self.layout.lock().revalidate_at(now, viewport)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("bus", &self.bus)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::layout_cache::{DerivedCell, InputSet, LayoutInputs};
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator() -> Coordinator {
        Coordinator::new(Config::default())
    }

    #[test]
    fn permitted_fire_reaches_listeners_and_releases_the_section() {
        let coord = coordinator();
        let seen: Arc<PlMutex<Vec<i64>>> = Arc::new(PlMutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        coord.bus().register(EventKind::ContentsChanged, move |e| {
            let id = e.attr("collection_id").and_then(|a| a.as_int()).unwrap_or(-1);
            seen_clone.lock().push(id);
            Ok(())
        });

        let t0 = Instant::now();
        let fired = coord.fire_if_permitted_at(
            EventKind::ContentsChanged,
            Some(42),
            |b| b.attr_int("collection_id", 42).build(),
            t0,
        );

        assert!(fired);
        assert_eq!(*seen.lock(), vec![42]);
        assert!(!coord.admission().is_refreshing());
    }

    #[test]
    fn debounce_suppresses_rapid_refires() {
        let coord = coordinator();
        let t0 = Instant::now();

        assert!(coord.fire_if_permitted_at(
            EventKind::ContentsChanged,
            Some(7),
            |b| b.build(),
            t0
        ));
        assert!(!coord.fire_if_permitted_at(
            EventKind::ContentsChanged,
            Some(7),
            |b| b.build(),
            t0 + Duration::from_millis(100)
        ));
        assert!(coord.fire_if_permitted_at(
            EventKind::ContentsChanged,
            Some(7),
            |b| b.build(),
            t0 + Duration::from_millis(300)
        ));
    }

    #[test]
    fn denial_is_a_silent_no_op_for_listeners() {
        let coord = coordinator();
        let hits: Arc<PlMutex<u32>> = Arc::new(PlMutex::new(0));

        let hits_clone = Arc::clone(&hits);
        coord.bus().register(EventKind::ItemAdded, move |_| {
            *hits_clone.lock() += 1;
            Ok(())
        });

        let t0 = Instant::now();
        coord.fire_if_permitted_at(EventKind::ItemAdded, Some(1), |b| b.build(), t0);
        coord.fire_if_permitted_at(
            EventKind::ItemAdded,
            Some(1),
            |b| b.build(),
            t0 + Duration::from_millis(10),
        );

        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn section_released_even_when_a_listener_fails() {
        let coord = coordinator();
        coord
            .bus()
            .register(EventKind::ContentsChanged, |_| panic!("listener bug"));

        let t0 = Instant::now();
        assert!(coord.fire_if_permitted_at(
            EventKind::ContentsChanged,
            Some(5),
            |b| b.build(),
            t0
        ));
        assert!(!coord.admission().is_refreshing());

        // The next permitted fire still goes through.
        assert!(coord.fire_if_permitted_at(
            EventKind::ContentsChanged,
            Some(5),
            |b| b.build(),
            t0 + Duration::from_millis(300)
        ));
    }

    #[test]
    fn unkeyed_fires_are_fail_open() {
        let coord = coordinator();
        let t0 = Instant::now();

        assert!(coord.fire_if_permitted_at(EventKind::SettingsChanged, None, |b| b.build(), t0));
        assert!(coord.fire_if_permitted_at(EventKind::SettingsChanged, None, |b| b.build(), t0));
    }

    #[test]
    fn tick_applies_viewport_drift_to_the_cache() {
        let coord = coordinator();
        let t0 = Instant::now();

        coord.layout().set_inputs(LayoutInputs {
            viewport_width: 80,
            viewport_height: 24,
            item_count: 0,
            visible: true,
            active: true,
        });

        assert!(!coord.tick_at(t0, (80, 24)));
        assert!(coord.tick_at(t0 + Duration::from_millis(1100), (100, 30)));

        let mut cell: DerivedCell<u32> = DerivedCell::new("columns", InputSet::VIEWPORT);
        let width = coord
            .layout()
            .get_or_compute(&mut cell, |i| Ok(u32::from(i.viewport_width)));
        assert_eq!(width, 100);
    }

    #[test]
    fn tick_ages_out_a_leaked_refresh_section() {
        let coord = coordinator();
        let t0 = Instant::now();

        let leaked = coord.admission().begin_refresh_at(t0);
        std::mem::forget(leaked);
        assert!(coord.admission().is_refreshing());

        coord.tick_at(t0 + Duration::from_millis(10_001), (80, 24));
        assert!(!coord.admission().is_refreshing());
    }
}

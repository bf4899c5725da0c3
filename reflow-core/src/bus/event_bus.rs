//! src/bus/event_bus.rs
//! ============================================================================
//! # EventBus: Type-Indexed Publish/Subscribe Registry
//!
//! Listener lists are kept per [`EventKind`] in an [`enum_map::EnumMap`]
//! (closed kind set, no hashing) plus one all-kinds list. Each list is an
//! [`ArcSwap`] copy-on-write snapshot:
//!
//! - `post` loads the current snapshot without locking or allocating, so the
//!   zero-listener path is cheap and in-flight dispatch is never disturbed
//!   by concurrent (or re-entrant) registration — listeners genuinely do
//!   register and unregister other listeners from inside their own handlers.
//! - registration/unregistration is an RCU replace, safe from any thread.
//!
//! A listener failure (error return or panic) is caught, counted, and logged;
//! it never aborts delivery to the remaining listeners and never propagates
//! to the poster.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use enum_map::EnumMap;
use tracing::{debug, warn};

use crate::error::CoordError;

use super::event::{Event, EventKind};

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Callable invoked with each delivered event.
pub type ListenerFn = dyn Fn(&Event) -> Result<(), CoordError> + Send + Sync;

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    callback: Arc<ListenerFn>,
}

/// Delivery counters, kept in atomics so `post` stays lock-free.
#[derive(Debug, Default)]
struct BusStats {
    posted: AtomicU64,
    delivered: AtomicU64,
    listener_failures: AtomicU64,
}

/// Point-in-time view of the bus delivery counters.
#[derive(Debug, Clone, Copy)]
pub struct BusStatsSnapshot {
    /// Events posted that had at least one listener.
    pub posted: u64,
    /// Individual listener invocations that completed successfully.
    pub delivered: u64,
    /// Listener invocations that returned an error or panicked.
    pub listener_failures: u64,
}

/// Type-indexed publish/subscribe registry with isolated listener failures.
pub struct EventBus {
    by_kind: EnumMap<EventKind, ArcSwap<Vec<ListenerEntry>>>,
    global: ArcSwap<Vec<ListenerEntry>>,
    next_id: AtomicU64,
    stats: BusStats,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_kind: EnumMap::from_fn(|_| ArcSwap::from_pointee(Vec::new())),
            global: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
            stats: BusStats::default(),
        }
    }

    /// Register a listener for one event kind. Registration order is
    /// preserved; registering the same callable twice yields two invocations
    /// per event.
    pub fn register<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<(), CoordError> + Send + Sync + 'static,
    {
        let entry = ListenerEntry {
            id: ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(listener),
        };

        let id = entry.id;
        self.by_kind[kind].rcu(|current| {
            let mut next: Vec<ListenerEntry> = (**current).clone();
            next.push(entry.clone());
            next
        });

        debug!(kind = kind.name(), %id, "registered listener");
        id
    }

    /// Register a listener for all event kinds.
    pub fn register_global<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<(), CoordError> + Send + Sync + 'static,
    {
        let entry = ListenerEntry {
            id: ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(listener),
        };

        let id = entry.id;
        self.global.rcu(|current| {
            let mut next: Vec<ListenerEntry> = (**current).clone();
            next.push(entry.clone());
            next
        });

        debug!(%id, "registered global listener");
        id
    }

    /// Remove the first listener registered under `kind` with this id.
    /// No-op when absent.
    pub fn unregister(&self, kind: EventKind, id: ListenerId) {
        self.by_kind[kind].rcu(|current| Self::without(current, id));
    }

    /// Remove the first global listener with this id. No-op when absent.
    pub fn unregister_global(&self, id: ListenerId) {
        self.global.rcu(|current| Self::without(current, id));
    }

    fn without(current: &Arc<Vec<ListenerEntry>>, id: ListenerId) -> Vec<ListenerEntry> {
        let mut next: Vec<ListenerEntry> = (**current).clone();
        if let Some(pos) = next.iter().position(|e| e.id == id) {
            next.remove(pos);
        }
        next
    }

    /// Deliver an event to every listener registered for its kind, then to
    /// every global listener, in registration order.
    ///
    /// With no listeners this returns immediately without allocating. Each
    /// listener is invoked exactly once per posted event against the
    /// snapshot current at post time; registrations made during dispatch
    /// take effect from the next post.
    pub fn post(&self, event: &Event) {
        let per_kind = self.by_kind[event.kind()].load();
        let global = self.global.load();

        if per_kind.is_empty() && global.is_empty() {
            return;
        }

        self.stats.posted.fetch_add(1, Ordering::Relaxed);

        for entry in per_kind.iter().chain(global.iter()) {
            self.invoke(entry, event);
        }
    }

    fn invoke(&self, entry: &ListenerEntry, event: &Event) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(event)));

        match outcome {
            Ok(Ok(())) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = event.kind().name(),
                    id = %entry.id,
                    error = %e,
                    "listener failed; continuing delivery"
                );
            }
            Err(panic) => {
                self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(
                    kind = event.kind().name(),
                    id = %entry.id,
                    reason = %reason,
                    "listener panicked; continuing delivery"
                );
            }
        }
    }

    /// Number of listeners currently registered for `kind` (globals not
    /// included).
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.by_kind[kind].load().len()
    }

    #[must_use]
    pub fn global_listener_count(&self) -> usize {
        self.global.load().len()
    }

    #[must_use]
    pub fn stats(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            posted: self.stats.posted.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            listener_failures: self.stats.listener_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("global_listeners", &self.global.load().len())
            .field("stats", &self.stats)
            .finish()
    }
}

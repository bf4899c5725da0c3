//! src/cache/layout_cache.rs
//! ============================================================================
//! # DerivedLayoutCache: Memoized Pure Functions of Layout Inputs
//!
//! Derived layout values are pure functions of a small input set: viewport
//! dimensions, item count, and visibility/activity flags. Each input group
//! carries a generation counter; a [`DerivedCell`] declares which groups it
//! depends on and remembers the generations it last computed against. A cell
//! recomputes only when a depended-on generation has moved, so an item-count
//! change never forces recomputation of a viewport-only value — partial
//! invalidation falls out of the generation vector.
//!
//! Referential transparency is a correctness requirement here: identical
//! inputs at an unchanged generation must yield the identical cached value
//! without re-running the compute function.
//!
//! The cache also re-validates against host-reported viewport dimensions at
//! most once per configured interval ([`DerivedLayoutCache::revalidate_at`]),
//! to tolerate host changes no event reports (window resizes in particular).

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CoordError;

/// Inputs the derived values are functions of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutInputs {
    pub viewport_width: u16,
    pub viewport_height: u16,
    pub item_count: usize,
    pub visible: bool,
    pub active: bool,
}

impl LayoutInputs {
    /// A zero-area viewport cannot produce meaningful layout.
    #[must_use]
    pub const fn viewport_is_valid(&self) -> bool {
        self.viewport_width > 0 && self.viewport_height > 0
    }
}

const GEN_VIEWPORT: usize = 0;
const GEN_ITEM_COUNT: usize = 1;
const GEN_FLAGS: usize = 2;
const GEN_GROUPS: usize = 3;

/// Bitmask over the input groups a derived value depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSet(u8);

impl InputSet {
    pub const EMPTY: Self = Self(0);
    pub const VIEWPORT: Self = Self(1);
    pub const ITEM_COUNT: Self = Self(2);
    pub const FLAGS: Self = Self(4);
    pub const ALL: Self = Self(7);

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    const fn group_mask(group: usize) -> Self {
        Self(1 << group)
    }
}

impl std::ops::BitOr for InputSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// One memoized derived value with a declared dependency set.
///
/// The cell owns the cached value; the cache owns the inputs and their
/// generations. Values are replaced on recomputation, never mutated.
#[derive(Debug)]
pub struct DerivedCell<T> {
    name: &'static str,
    deps: InputSet,
    seen: Option<[u64; GEN_GROUPS]>,
    value: Option<T>,
}

impl<T> DerivedCell<T> {
    #[must_use]
    pub const fn new(name: &'static str, deps: InputSet) -> Self {
        Self {
            name,
            deps,
            seen: None,
            value: None,
        }
    }

    /// Explicitly drop the cached value; next access recomputes.
    pub fn invalidate(&mut self) {
        self.seen = None;
        self.value = None;
    }

    #[must_use]
    pub const fn deps(&self) -> InputSet {
        self.deps
    }

    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.value.is_some()
    }
}

/// Memoization coordinator for derived layout values.
pub struct DerivedLayoutCache {
    inputs: LayoutInputs,
    generations: [u64; GEN_GROUPS],
    recheck_interval: Duration,
    last_recheck: Option<Instant>,
}

impl DerivedLayoutCache {
    #[must_use]
    pub fn new(cfg: &CacheConfig) -> Self {
        Self::with_inputs(cfg, LayoutInputs::default())
    }

    #[must_use]
    pub fn with_inputs(cfg: &CacheConfig, inputs: LayoutInputs) -> Self {
        Self {
            inputs,
            generations: [0; GEN_GROUPS],
            recheck_interval: cfg.recheck_interval,
            last_recheck: None,
        }
    }

    #[must_use]
    pub const fn inputs(&self) -> &LayoutInputs {
        &self.inputs
    }

    /// Replace the inputs, bumping the generation of every group that
    /// actually changed. Returns the changed set.
    pub fn set_inputs(&mut self, next: LayoutInputs) -> InputSet {
        let mut changed = InputSet::EMPTY;

        if (next.viewport_width, next.viewport_height)
            != (self.inputs.viewport_width, self.inputs.viewport_height)
        {
            changed = changed | InputSet::VIEWPORT;
            self.generations[GEN_VIEWPORT] += 1;
        }
        if next.item_count != self.inputs.item_count {
            changed = changed | InputSet::ITEM_COUNT;
            self.generations[GEN_ITEM_COUNT] += 1;
        }
        if (next.visible, next.active) != (self.inputs.visible, self.inputs.active) {
            changed = changed | InputSet::FLAGS;
            self.generations[GEN_FLAGS] += 1;
        }

        if !changed.is_empty() {
            debug!(changed = changed.bits(), "layout inputs changed");
            self.inputs = next;
        }

        changed
    }

    /// Full invalidation for callers that cannot cheaply determine which
    /// inputs changed.
    pub fn invalidate_all(&mut self) {
        for generation in &mut self.generations {
            *generation += 1;
        }
        debug!("layout cache fully invalidated");
    }

    /// Compare host-reported viewport dimensions against the last-seen ones,
    /// at most once per re-check interval. Returns true when drift was
    /// detected and applied.
    pub fn revalidate(&mut self, viewport: (u16, u16)) -> bool {
        self.revalidate_at(Instant::now(), viewport)
    }

    /// Explicit-time variant of [`Self::revalidate`].
    pub fn revalidate_at(&mut self, now: Instant, viewport: (u16, u16)) -> bool {
        if let Some(last) = self.last_recheck {
            if now.saturating_duration_since(last) < self.recheck_interval {
                return false;
            }
        }
        self.last_recheck = Some(now);

        let (width, height) = viewport;
        if (width, height) == (self.inputs.viewport_width, self.inputs.viewport_height) {
            return false;
        }

        debug!(width, height, "viewport drift detected on re-check");
        let next = LayoutInputs {
            viewport_width: width,
            viewport_height: height,
            ..self.inputs
        };
        !self.set_inputs(next).is_empty()
    }

    /// Return the cached value when every depended-on generation is
    /// unchanged; otherwise recompute and replace the entry.
    ///
    /// A failed computation (or a zero-area viewport for viewport-dependent
    /// cells) yields `T::default()` instead of an error; the failure is
    /// logged and the fallback is cached until the inputs move again.
    pub fn get_or_compute<T, F>(&self, cell: &mut DerivedCell<T>, compute: F) -> T
    where
        T: Clone + Default,
        F: FnOnce(&LayoutInputs) -> Result<T, CoordError>,
    {
        if let (Some(seen), Some(value)) = (&cell.seen, &cell.value) {
            if self.generations_match(cell.deps, seen) {
                return value.clone();
            }
        }

        let value = if cell.deps.intersects(InputSet::VIEWPORT) && !self.inputs.viewport_is_valid()
        {
            let e = CoordError::InvalidViewport {
                width: self.inputs.viewport_width,
                height: self.inputs.viewport_height,
            };
            warn!(cell = cell.name, error = %e, "using neutral default");
            T::default()
        } else {
            match compute(&self.inputs) {
                Ok(v) => v,
                Err(e) => {
                    warn!(cell = cell.name, error = %e, "computation failed, using neutral default");
                    T::default()
                }
            }
        };

        cell.seen = Some(self.generations);
        cell.value = Some(value.clone());
        value
    }

    fn generations_match(&self, deps: InputSet, seen: &[u64; GEN_GROUPS]) -> bool {
        (0..GEN_GROUPS).all(|group| {
            !deps.intersects(InputSet::group_mask(group)) || seen[group] == self.generations[group]
        })
    }
}

impl std::fmt::Debug for DerivedLayoutCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedLayoutCache")
            .field("inputs", &self.inputs)
            .field("generations", &self.generations)
            .finish_non_exhaustive()
    }
}

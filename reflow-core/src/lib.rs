pub mod error;

pub mod config;

pub mod bus {
    pub mod event;
    pub use event::{AttrValue, EntityRef, Event, EventBuilder, EventKind};

    pub mod event_bus;
    pub use event_bus::{BusStatsSnapshot, EventBus, ListenerId};
}

pub mod coordinate {
    pub mod debouncer;
    pub use debouncer::Debouncer;

    pub mod admission;
    pub use admission::{RefreshAdmissionController, RefreshGuard, RefreshStatsSnapshot};

    pub mod coordinator;
    pub use coordinator::Coordinator;
}

pub mod cache {
    pub mod layout_cache;
    pub use layout_cache::{DerivedCell, DerivedLayoutCache, InputSet, LayoutInputs};
}

pub mod logging;
pub use logging::Logger;

pub use bus::{Event, EventBus, EventKind};
pub use cache::{DerivedLayoutCache, LayoutInputs};
pub use config::Config;
pub use coordinate::{Coordinator, Debouncer, RefreshAdmissionController};
pub use error::CoordError;

//! src/bus/event.rs
//! ============================================================================
//! # Event: Immutable Change Notification Records
//!
//! An [`Event`] describes one state change: a closed-set [`EventKind`], an
//! opaque source reference, and an ordered mapping of named attributes. The
//! core never interprets attribute payloads; they are carried verbatim from
//! the builder to the listeners.
//!
//! Events are built once via [`EventBuilder`] and never mutated afterwards.
//! They are created and consumed within a single dispatch call.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use compact_str::CompactString;
use enum_map::Enum;
use indexmap::IndexMap;

/// Opaque reference to a domain entity attached to an event.
pub type EntityRef = Arc<dyn Any + Send + Sync>;

/// Closed set of notification categories.
///
/// Fixed at compile time; there is no dynamic registration of new kinds.
/// Derives [`enum_map::Enum`] so the bus can index listener lists by kind
/// without hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum EventKind {
    CollectionCreated,
    CollectionDeleted,
    CollectionRenamed,
    CollectionMoved,
    ContentsChanged,
    ItemAdded,
    ItemRemoved,
    ItemUpdated,
    BookmarkAdded,
    BookmarkRemoved,
    DisplayRefreshed,
    ViewportResized,
    VisibilityChanged,
    ActivationChanged,
    SettingsChanged,
}

impl EventKind {
    /// Stable name for logging and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CollectionCreated => "collection_created",
            Self::CollectionDeleted => "collection_deleted",
            Self::CollectionRenamed => "collection_renamed",
            Self::CollectionMoved => "collection_moved",
            Self::ContentsChanged => "contents_changed",
            Self::ItemAdded => "item_added",
            Self::ItemRemoved => "item_removed",
            Self::ItemUpdated => "item_updated",
            Self::BookmarkAdded => "bookmark_added",
            Self::BookmarkRemoved => "bookmark_removed",
            Self::DisplayRefreshed => "display_refreshed",
            Self::ViewportResized => "viewport_resized",
            Self::VisibilityChanged => "visibility_changed",
            Self::ActivationChanged => "activation_changed",
            Self::SettingsChanged => "settings_changed",
        }
    }
}

/// Opaque attribute value. The core treats all variants as payload and never
/// inspects them.
#[derive(Clone)]
pub enum AttrValue {
    /// Numeric identifier (collection id, item id, ...).
    Int(i64),

    /// Short text payload.
    Text(CompactString),

    /// Reference to a domain entity the listeners know how to downcast.
    Entity(EntityRef),
}

impl AttrValue {
    /// Integer payload, if this attribute carries one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if this attribute carries one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Entity payload, if this attribute carries one.
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }
}

// Manual Debug: `Arc<dyn Any>` has no Debug impl worth printing.
impl fmt::Debug for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Entity(_) => f.write_str("Entity(..)"),
        }
    }
}

/// Immutable change-notification record.
#[derive(Clone)]
pub struct Event {
    kind: EventKind,
    source: Option<EntityRef>,
    attributes: IndexMap<CompactString, AttrValue>,
}

impl Event {
    /// Start building an event of the given kind.
    #[must_use]
    pub fn builder(kind: EventKind) -> EventBuilder {
        EventBuilder {
            kind,
            source: None,
            attributes: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> Option<&EntityRef> {
        self.source.as_ref()
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn attr_count(&self) -> usize {
        self.attributes.len()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Builder for [`Event`]; consumed by `build()`.
pub struct EventBuilder {
    kind: EventKind,
    source: Option<EntityRef>,
    attributes: IndexMap<CompactString, AttrValue>,
}

impl EventBuilder {
    /// Attach the opaque source reference.
    #[must_use]
    pub fn source(mut self, source: EntityRef) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a numeric attribute.
    #[must_use]
    pub fn attr_int(mut self, name: impl Into<CompactString>, value: i64) -> Self {
        self.attributes.insert(name.into(), AttrValue::Int(value));
        self
    }

    /// Attach a text attribute.
    #[must_use]
    pub fn attr_text(
        mut self,
        name: impl Into<CompactString>,
        value: impl Into<CompactString>,
    ) -> Self {
        self.attributes
            .insert(name.into(), AttrValue::Text(value.into()));
        self
    }

    /// Attach an opaque entity attribute.
    #[must_use]
    pub fn attr_entity(mut self, name: impl Into<CompactString>, value: EntityRef) -> Self {
        self.attributes
            .insert(name.into(), AttrValue::Entity(value));
        self
    }

    /// Finish building; the event is immutable from here on.
    #[must_use]
    pub fn build(self) -> Event {
        Event {
            kind: self.kind,
            source: self.source,
            attributes: self.attributes,
        }
    }
}

impl fmt::Debug for EventBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuilder")
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_attribute_order() {
        let event = Event::builder(EventKind::ContentsChanged)
            .attr_int("collection_id", 42)
            .attr_text("name", "inbox")
            .attr_int("item_count", 7)
            .build();

        let names: Vec<&str> = event.attributes().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["collection_id", "name", "item_count"]);
        assert_eq!(event.attr_count(), 3);
    }

    #[test]
    fn attr_lookup_and_typed_accessors() {
        let entity: EntityRef = Arc::new(String::from("folder"));
        let event = Event::builder(EventKind::BookmarkAdded)
            .source(Arc::new(17_u32))
            .attr_int("id", 5)
            .attr_entity("target", entity)
            .build();

        assert_eq!(event.kind(), EventKind::BookmarkAdded);
        assert_eq!(event.attr("id").and_then(AttrValue::as_int), Some(5));
        assert!(event.attr("target").and_then(AttrValue::as_entity).is_some());
        assert!(event.attr("missing").is_none());

        let source = event.source().expect("source set");
        assert_eq!(source.downcast_ref::<u32>(), Some(&17));
    }
}

//! Event kinds, payload filters and the event objects handed to callbacks.

use crate::access::{Expiration, ItemPriority, ItemVersion};
use crate::registry::{HandlerId, RegistryHandler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Kind of change or condition reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ItemAdded,
    ItemUpdated,
    ItemRemoved,
    Custom,
    CacheCleared,
    CacheStopped,
    ConnectivityChanged,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::ItemAdded,
        EventType::ItemUpdated,
        EventType::ItemRemoved,
        EventType::Custom,
        EventType::CacheCleared,
        EventType::CacheStopped,
        EventType::ConnectivityChanged,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Events that describe a change to a single item
    pub fn is_item_event(self) -> bool {
        matches!(
            self,
            EventType::ItemAdded | EventType::ItemUpdated | EventType::ItemRemoved
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::ItemAdded => "item_added",
            EventType::ItemUpdated => "item_updated",
            EventType::ItemRemoved => "item_removed",
            EventType::Custom => "custom",
            EventType::CacheCleared => "cache_cleared",
            EventType::CacheStopped => "cache_stopped",
            EventType::ConnectivityChanged => "connectivity_changed",
        };
        f.write_str(name)
    }
}

/// Set of event types a subscription is interested in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);

    pub fn contains(self, event_type: EventType) -> bool {
        self.0 & event_type.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn event_types(self) -> impl Iterator<Item = EventType> {
        EventType::ALL
            .into_iter()
            .filter(move |event_type| self.contains(*event_type))
    }
}

impl From<EventType> for EventMask {
    fn from(event_type: EventType) -> Self {
        EventMask(event_type.bit())
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOr<EventType> for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventType) -> EventMask {
        self | EventMask::from(rhs)
    }
}

impl BitOr for EventType {
    type Output = EventMask;

    fn bitor(self, rhs: EventType) -> EventMask {
        EventMask::from(self) | rhs
    }
}

/// Richness of the payload delivered with a notification.
///
/// Ordered from cheapest to richest so the effective filter of two
/// settings is their minimum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventDataFilter {
    /// Key and event kind only
    #[default]
    None,
    /// Adds version, timestamps and expiration metadata
    Metadata,
    /// Adds the deserialized value on top of the metadata
    MetadataAndData,
}

/// Why an item left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovedReason {
    Removed,
    Expired,
    Evicted,
    DependencyChanged,
}

/// Item snapshot attached to an event, shaped by its [`EventDataFilter`]
#[derive(Debug, Clone, PartialEq)]
pub struct EventCacheItem {
    pub version: ItemVersion,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub expiration: Expiration,
    pub priority: ItemPriority,
    pub group: Option<String>,
    /// Present only with [`EventDataFilter::MetadataAndData`]
    pub value: Option<serde_json::Value>,
}

/// Notification handed to an [`EventCallback`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub cache_id: String,
    pub event_type: EventType,
    pub key: Option<String>,
    pub filter: EventDataFilter,
    pub item: Option<EventCacheItem>,
    /// Previous item state, populated for updates only
    pub old_item: Option<EventCacheItem>,
    pub reason: Option<RemovedReason>,
    /// Application payload of custom events
    pub custom_data: Option<serde_json::Value>,
}

type EventCallbackFn = dyn Fn(&CacheEvent) + Send + Sync;

/// Application handler for cache events.
///
/// Clones share identity: registering a clone counts as registering the same
/// handler again.
#[derive(Clone)]
pub struct EventCallback(Arc<EventCallbackFn>);

impl EventCallback {
    pub fn new(callback: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn invoke(&self, event: &CacheEvent) {
        (self.0)(event)
    }
}

impl RegistryHandler for EventCallback {
    fn handler_id(&self) -> HandlerId {
        HandlerId::of(&self.0)
    }
}

impl fmt::Debug for EventCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventCallback")
            .field(&self.handler_id())
            .finish()
    }
}

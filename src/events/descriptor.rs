//! Handles returned by event registrations.

use super::types::{EventCallback, EventDataFilter, EventMask, EventType};
use crate::engine::EngineSubscriptionId;
use crate::registry::{CallbackCategory, CallbackToken};
use uuid::Uuid;

/// Tokens issued for a per-key registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectiveTokens {
    pub update_token: Option<CallbackToken>,
    pub remove_token: Option<CallbackToken>,
}

impl SelectiveTokens {
    pub fn is_empty(&self) -> bool {
        self.update_token.is_none() && self.remove_token.is_none()
    }
}

/// Handler plus payload filter attached to a write
#[derive(Debug, Clone)]
pub struct ItemCallback {
    pub handler: EventCallback,
    pub filter: EventDataFilter,
}

impl ItemCallback {
    pub fn new(handler: EventCallback, filter: EventDataFilter) -> Self {
        Self { handler, filter }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GeneralRegistration {
    pub event_type: EventType,
    pub category: CallbackCategory,
    pub token: CallbackToken,
    pub subscription: EngineSubscriptionId,
}

/// Opaque receipt of a cache-wide registration.
///
/// Pass it back to [`EventMultiplexer::unregister`](super::EventMultiplexer::unregister)
/// to stop delivery. Unregistering a descriptor twice is a no-op.
#[derive(Debug, Clone)]
pub struct CacheEventDescriptor {
    id: Uuid,
    event_mask: EventMask,
    filter: EventDataFilter,
    pub(crate) handler: EventCallback,
    pub(crate) registrations: Vec<GeneralRegistration>,
}

impl CacheEventDescriptor {
    pub(crate) fn new(
        handler: EventCallback,
        event_mask: EventMask,
        filter: EventDataFilter,
        registrations: Vec<GeneralRegistration>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_mask,
            filter,
            handler,
            registrations,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_mask(&self) -> EventMask {
        self.event_mask
    }

    pub fn filter(&self) -> EventDataFilter {
        self.filter
    }

    pub fn handler(&self) -> &EventCallback {
        &self.handler
    }
}

impl PartialEq for CacheEventDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CacheEventDescriptor {}

//! Request and response shapes exchanged with a [`RemoteEngine`](super::RemoteEngine).

use crate::access::{AccessRequest, Expiration, ItemPriority, ItemVersion, LockHandle};
use crate::events::{EventDataFilter, EventType, RemovedReason};
use crate::registry::{CallbackCategory, CallbackToken};
use crate::serialization::EncodedValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-side metadata of a stored item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    pub version: ItemVersion,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub expiration: Expiration,
    pub priority: ItemPriority,
    pub group: Option<String>,
    pub sub_group: Option<String>,
}

/// Encoded value plus metadata as returned by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub value: EncodedValue,
    pub metadata: ItemMetadata,
}

/// Result of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(StoredItem),
    NotFound,
    /// The key is locked and the mode asked not to read through the lock
    Locked,
    /// The caller's version is still current; no value was transferred
    Unchanged(ItemVersion),
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub key: String,
    pub access: AccessRequest,
}

#[derive(Debug, Clone)]
pub struct GetResponse {
    pub outcome: ReadOutcome,
    /// Fresh handle when the read acquired the lock
    pub lock_handle: Option<LockHandle>,
}

/// Callback token a write attaches to its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCallback {
    pub token: CallbackToken,
    pub filter: EventDataFilter,
}

#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub key: String,
    pub value: EncodedValue,
    pub expiration: Expiration,
    pub priority: ItemPriority,
    pub group: Option<String>,
    pub sub_group: Option<String>,
    pub access: AccessRequest,
    pub update_callback: Option<KeyCallback>,
    pub remove_callback: Option<KeyCallback>,
    /// Fail with `KeyExists` instead of overwriting
    pub only_if_absent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertResponse {
    pub version: ItemVersion,
}

#[derive(Debug, Clone)]
pub struct RemoveRequest {
    pub key: String,
    pub access: AccessRequest,
}

/// Identifier the engine assigns to a cache-wide subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineSubscriptionId(u64);

impl EngineSubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineSubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Tokens and filter for a per-key registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyNotification {
    pub update_token: Option<CallbackToken>,
    pub remove_token: Option<CallbackToken>,
    pub filter: EventDataFilter,
}

/// Who a notification is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTarget {
    /// A token registered against a key (selective events)
    Token {
        category: CallbackCategory,
        token: CallbackToken,
    },
    /// A cache-wide subscription
    Subscription(EngineSubscriptionId),
}

/// Full payload as produced by the engine, before filtering
#[derive(Debug, Clone, Default)]
pub struct NotificationPayload {
    pub item: Option<StoredItem>,
    pub old_item: Option<StoredItem>,
    pub reason: Option<RemovedReason>,
    pub custom_data: Option<serde_json::Value>,
}

/// Inbound notification from the engine
#[derive(Debug, Clone)]
pub struct EngineNotification {
    pub target: NotificationTarget,
    pub event_type: EventType,
    pub key: Option<String>,
    pub filter: EventDataFilter,
    pub payload: NotificationPayload,
}

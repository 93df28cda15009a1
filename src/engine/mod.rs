//! # Remote Engine Interface
//!
//! The storage, replication and partitioning engine the session talks to.
//! The session only depends on this trait; wire encoding is the
//! implementation's business.
//!
//! Calls are blocking from the caller's point of view. Per-key lock state and
//! item versions are owned by the engine.

pub mod memory;
pub mod types;

use crate::access::LockHandle;
use crate::enumeration::{EnumerationPointer, EnumerationScope, PartitionChunk, PartitionId};
use crate::error::Result;
use crate::events::{EventDataFilter, EventType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{EngineCallCounts, InMemoryEngine};
pub use types::{
    EngineNotification, EngineSubscriptionId, GetRequest, GetResponse, InsertRequest,
    InsertResponse, ItemMetadata, KeyCallback, KeyNotification, NotificationPayload,
    NotificationTarget, ReadOutcome, RemoveRequest, StoredItem,
};

/// Receiver of notifications pushed by the engine
pub trait NotificationListener: Send + Sync {
    /// Called on the engine's delivering thread
    fn on_notification(&self, notification: EngineNotification);

    /// Called once the engine has dropped every key registration on `key`,
    /// after any notifications for the same removal were delivered
    fn on_key_registrations_dropped(&self, _key: &str) {}
}

/// Operations the session consumes from the cache engine
pub trait RemoteEngine: Send + Sync {
    fn get(&self, request: GetRequest) -> Result<GetResponse>;

    fn get_bulk(&self, keys: &[String]) -> Result<HashMap<String, StoredItem>>;

    fn insert(&self, request: InsertRequest) -> Result<InsertResponse>;

    /// Remove a key, returning the item that was stored
    fn remove(&self, request: RemoveRequest) -> Result<Option<StoredItem>>;

    /// Lock a key without reading it; `None` when the key does not exist
    fn lock(&self, key: &str, timeout: Duration) -> Result<Option<LockHandle>>;

    /// Release a lock; without a handle the lock is released unconditionally
    fn unlock(&self, key: &str, handle: Option<&LockHandle>) -> Result<()>;

    /// Handle of the lock currently held on `key`, if any
    fn lock_status(&self, key: &str) -> Result<Option<LockHandle>>;

    fn contains(&self, key: &str) -> Result<bool>;

    fn count(&self) -> Result<u64>;

    fn clear(&self) -> Result<()>;

    /// Partitions that contribute to a traversal of `scope`
    fn enumeration_partitions(&self, scope: &EnumerationScope) -> Result<Vec<PartitionId>>;

    /// Serve the next chunk for every pointer.
    ///
    /// Pointers flagged disposable are released instead of advanced. A failure
    /// affecting only some partitions is reported per partition.
    fn fetch_chunk(
        &self,
        scope: &EnumerationScope,
        pointers: &[EnumerationPointer],
        chunk_size: usize,
    ) -> Result<Vec<PartitionChunk>>;

    fn register_key_notification(&self, key: &str, notification: KeyNotification) -> Result<()>;

    fn unregister_key_notification(&self, key: &str, notification: KeyNotification)
        -> Result<()>;

    fn register_general_notification(
        &self,
        event_type: EventType,
        filter: EventDataFilter,
    ) -> Result<EngineSubscriptionId>;

    fn unregister_general_notification(&self, subscription: EngineSubscriptionId) -> Result<()>;

    /// Route future notifications to `listener`
    fn attach_listener(&self, listener: Arc<dyn NotificationListener>);

    /// Drop every registration and listener belonging to this session
    fn dispose_session(&self) -> Result<()>;
}

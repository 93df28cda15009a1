//! Options and result shapes of the session surface.

use crate::access::{AccessRequest, Expiration, ItemPriority, ItemVersion, LockHandle};
use crate::events::{EventCallback, EventDataFilter, ItemCallback};
use crate::serialization::ValueFlags;
use chrono::{DateTime, Utc};

/// Per-write settings for [`CacheSession::insert_with`](super::CacheSession::insert_with)
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub expiration: Expiration,
    pub priority: ItemPriority,
    pub group: Option<String>,
    pub sub_group: Option<String>,
    pub access: AccessRequest,
    /// Extra flags carried with the encoded value
    pub flags: ValueFlags,
    pub update_callback: Option<ItemCallback>,
    pub remove_callback: Option<ItemCallback>,
}

impl InsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn priority(mut self, priority: ItemPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn group(mut self, group: impl Into<String>, sub_group: Option<String>) -> Self {
        self.group = Some(group.into());
        self.sub_group = sub_group;
        self
    }

    pub fn access(mut self, access: AccessRequest) -> Self {
        self.access = access;
        self
    }

    pub fn flags(mut self, flags: ValueFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Notify `handler` when the written item is later updated
    pub fn on_update(mut self, handler: EventCallback, filter: EventDataFilter) -> Self {
        self.update_callback = Some(ItemCallback::new(handler, filter));
        self
    }

    /// Notify `handler` when the written item is removed
    pub fn on_remove(mut self, handler: EventCallback, filter: EventDataFilter) -> Self {
        self.remove_callback = Some(ItemCallback::new(handler, filter));
        self
    }
}

/// Outcome of an access-mode read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult<T> {
    Found {
        value: T,
        version: ItemVersion,
        /// Set when the read acquired the lock
        lock_handle: Option<LockHandle>,
    },
    NotFound,
    /// The key is locked; no value or handle was returned
    Locked,
    /// The caller's version is current; no value was transferred
    Unchanged(ItemVersion),
}

impl<T> ReadResult<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, ReadResult::Found { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ReadResult::Found { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            ReadResult::Found { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn version(&self) -> Option<ItemVersion> {
        match self {
            ReadResult::Found { version, .. } | ReadResult::Unchanged(version) => Some(*version),
            _ => None,
        }
    }

    pub fn lock_handle(&self) -> Option<&LockHandle> {
        match self {
            ReadResult::Found { lock_handle, .. } => lock_handle.as_ref(),
            _ => None,
        }
    }
}

/// Value plus the metadata the engine keeps for it
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem<T> {
    pub key: String,
    pub value: T,
    pub version: ItemVersion,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub expiration: Expiration,
    pub priority: ItemPriority,
    pub group: Option<String>,
    pub sub_group: Option<String>,
    pub flags: ValueFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_result_accessors() {
        let found = ReadResult::Found {
            value: 7,
            version: ItemVersion::new(3),
            lock_handle: None,
        };
        assert!(found.is_found());
        assert_eq!(found.value(), Some(&7));
        assert_eq!(found.version(), Some(ItemVersion::new(3)));

        let unchanged: ReadResult<i32> = ReadResult::Unchanged(ItemVersion::new(3));
        assert!(unchanged.value().is_none());
        assert_eq!(unchanged.version(), Some(ItemVersion::new(3)));
        assert!(ReadResult::<i32>::Locked.into_value().is_none());
    }

    #[test]
    fn test_insert_options_builder() {
        let options = InsertOptions::new()
            .priority(ItemPriority::High)
            .group("orders", Some("eu".to_string()))
            .on_update(EventCallback::new(|_| {}), EventDataFilter::Metadata);
        assert_eq!(options.group.as_deref(), Some("orders"));
        assert_eq!(options.priority, ItemPriority::High);
        assert!(options.update_callback.is_some());
        assert!(options.remove_callback.is_none());
    }
}

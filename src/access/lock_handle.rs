//! Lock capabilities and item versions handed out by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque capability proving ownership of a key's lock.
///
/// Issued by an `Acquire` call and passed back by value to release the lock
/// or to perform a protected mutation. Never reused across keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHandle {
    lock_id: String,
    acquired_at: DateTime<Utc>,
}

impl LockHandle {
    pub fn new(lock_id: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            lock_id: lock_id.into(),
            acquired_at,
        }
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// A handle without a lock id carries no capability
    pub fn is_empty(&self) -> bool {
        self.lock_id.is_empty()
    }
}

impl fmt::Display for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.lock_id, self.acquired_at.to_rfc3339())
    }
}

/// Per-key mutation counter assigned by the engine.
///
/// Only equality is meaningful on the client; which version is newer is the
/// engine's decision. Version `0` is never assigned and stands for "no version".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemVersion(u64);

impl ItemVersion {
    pub const NONE: ItemVersion = ItemVersion(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ItemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_handle() {
        assert!(LockHandle::new("", Utc::now()).is_empty());
        assert!(!LockHandle::new("lock-1", Utc::now()).is_empty());
    }

    #[test]
    fn test_version_none() {
        assert!(ItemVersion::default().is_none());
        assert!(!ItemVersion::new(3).is_none());
        assert_eq!(ItemVersion::new(3).to_string(), "v3");
    }
}

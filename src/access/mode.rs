//! # Access Modes
//!
//! Every read-modify-write call carries exactly one [`AccessMode`]. The mode
//! decides whether a [`LockHandle`] and/or an [`ItemVersion`] must, may, or
//! must not accompany the call. Validation is pure and runs before any
//! network call.

use super::lock_handle::{ItemVersion, LockHandle};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lock/version behaviour requested for a single operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Plain access; a lock handle may be supplied to prove ownership
    #[default]
    Default,
    /// Proceed regardless of any lock held on the key
    IgnoreLock,
    /// Read and lock the key for the requested duration
    Acquire,
    /// Read only when the key is not locked
    DontAcquire,
    /// Mutate under a held lock and release it atomically
    Release,
    /// Mutate under a held lock and keep holding it
    DontRelease,
    /// Mutate only if the stored version still equals the supplied one
    CompareVersion,
    /// Read only if the stored version differs from the supplied one
    MatchVersion,
    /// Read and return the current version alongside the value
    GetVersion,
}

impl AccessMode {
    pub const ALL: [AccessMode; 9] = [
        AccessMode::Default,
        AccessMode::IgnoreLock,
        AccessMode::Acquire,
        AccessMode::DontAcquire,
        AccessMode::Release,
        AccessMode::DontRelease,
        AccessMode::CompareVersion,
        AccessMode::MatchVersion,
        AccessMode::GetVersion,
    ];

    /// Whether the mode may accompany `operation`
    pub fn supports(self, operation: Operation) -> bool {
        use AccessMode::*;
        match operation {
            Operation::Read => matches!(
                self,
                Default | IgnoreLock | Acquire | DontAcquire | MatchVersion | GetVersion
            ),
            Operation::Write => matches!(
                self,
                Default | IgnoreLock | Release | DontRelease | CompareVersion
            ),
            Operation::Remove => {
                matches!(self, Default | IgnoreLock | Release | CompareVersion)
            }
        }
    }

    pub fn lock_handle_rule(self) -> FieldRule {
        match self {
            AccessMode::Default => FieldRule::Optional,
            AccessMode::Release | AccessMode::DontRelease => FieldRule::Required,
            _ => FieldRule::Forbidden,
        }
    }

    pub fn version_rule(self) -> FieldRule {
        match self {
            AccessMode::CompareVersion | AccessMode::MatchVersion => FieldRule::Required,
            _ => FieldRule::Forbidden,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMode::Default => "default",
            AccessMode::IgnoreLock => "ignore_lock",
            AccessMode::Acquire => "acquire",
            AccessMode::DontAcquire => "dont_acquire",
            AccessMode::Release => "release",
            AccessMode::DontRelease => "dont_release",
            AccessMode::CompareVersion => "compare_version",
            AccessMode::MatchVersion => "match_version",
            AccessMode::GetVersion => "get_version",
        };
        f.write_str(name)
    }
}

/// Whether an optional field must be present for a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Required,
    Optional,
    Forbidden,
}

/// Kind of engine call an access request accompanies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
            Operation::Remove => f.write_str("remove"),
        }
    }
}

/// Access mode plus the lock/version fields it travels with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequest {
    pub mode: AccessMode,
    pub lock_handle: Option<LockHandle>,
    pub version: Option<ItemVersion>,
    /// Lock duration for `Acquire`; `Duration::ZERO` locks until released
    pub lock_timeout: Option<Duration>,
}

impl AccessRequest {
    pub fn new(mode: AccessMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn ignore_lock() -> Self {
        Self::new(AccessMode::IgnoreLock)
    }

    /// Plain access proving ownership of a lock held on the key
    pub fn with_lock(handle: LockHandle) -> Self {
        Self::new(AccessMode::Default).lock_handle(handle)
    }

    pub fn acquire(timeout: Duration) -> Self {
        Self {
            mode: AccessMode::Acquire,
            lock_timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn dont_acquire() -> Self {
        Self::new(AccessMode::DontAcquire)
    }

    pub fn release(handle: LockHandle) -> Self {
        Self::new(AccessMode::Release).lock_handle(handle)
    }

    pub fn dont_release(handle: LockHandle) -> Self {
        Self::new(AccessMode::DontRelease).lock_handle(handle)
    }

    pub fn compare_version(version: ItemVersion) -> Self {
        Self::new(AccessMode::CompareVersion).version(version)
    }

    pub fn match_version(version: ItemVersion) -> Self {
        Self::new(AccessMode::MatchVersion).version(version)
    }

    pub fn get_version() -> Self {
        Self::new(AccessMode::GetVersion)
    }

    pub fn lock_handle(mut self, handle: LockHandle) -> Self {
        self.lock_handle = Some(handle);
        self
    }

    pub fn version(mut self, version: ItemVersion) -> Self {
        self.version = Some(version);
        self
    }

    fn has_lock_handle(&self) -> bool {
        self.lock_handle.as_ref().is_some_and(|handle| !handle.is_empty())
    }

    fn has_version(&self) -> bool {
        self.version.is_some_and(|version| !version.is_none())
    }

    /// Check the request against the mode's rules for `operation`
    pub fn validate(&self, operation: Operation) -> Result<()> {
        if self.has_lock_handle() && self.has_version() {
            return Err(CacheError::invalid_argument(
                "a lock handle and an item version cannot be supplied on the same call",
            ));
        }

        if !self.mode.supports(operation) {
            return Err(CacheError::invalid_argument(format!(
                "access mode '{}' is not valid for a {operation} operation",
                self.mode
            )));
        }

        match (self.mode.lock_handle_rule(), self.has_lock_handle()) {
            (FieldRule::Required, false) => {
                return Err(CacheError::invalid_argument(format!(
                    "access mode '{}' requires a lock handle",
                    self.mode
                )))
            }
            (FieldRule::Forbidden, true) => {
                return Err(CacheError::invalid_argument(format!(
                    "access mode '{}' does not accept a lock handle",
                    self.mode
                )))
            }
            _ => {}
        }

        match (self.mode.version_rule(), self.has_version()) {
            (FieldRule::Required, false) => {
                return Err(CacheError::invalid_argument(format!(
                    "access mode '{}' requires an item version",
                    self.mode
                )))
            }
            (FieldRule::Forbidden, true) => {
                return Err(CacheError::invalid_argument(format!(
                    "access mode '{}' does not accept an item version",
                    self.mode
                )))
            }
            _ => {}
        }

        if self.lock_timeout.is_some() && self.mode != AccessMode::Acquire {
            return Err(CacheError::invalid_argument(format!(
                "a lock timeout only applies to '{}', not '{}'",
                AccessMode::Acquire,
                self.mode
            )));
        }

        Ok(())
    }
}

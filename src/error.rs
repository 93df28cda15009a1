//! # Cache Session Error Types
//!
//! Unified error handling for every session, registry, enumeration and event
//! operation.

use crate::registry::CallbackCategory;
use thiserror::Error;

/// Session operation result type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error kinds surfaced by the cache session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Cache is not initialized")]
    NotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Item is locked: {key}")]
    LockConflict { key: String },

    #[error("Item version mismatch: {key}")]
    VersionMismatch { key: String },

    #[error("Callback category exhausted: {category}")]
    CategoryExhausted { category: CallbackCategory },

    #[error("Partition unavailable: {partition_id} - {reason}")]
    PartitionUnavailable { partition_id: u32, reason: String },

    #[error("Timeout waiting for operation: {operation}")]
    Timeout { operation: String },

    #[error("Key already exists: {key}")]
    KeyExists { key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl CacheError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a lock conflict error for a key
    pub fn lock_conflict(key: impl Into<String>) -> Self {
        Self::LockConflict { key: key.into() }
    }

    /// Create a version mismatch error for a key
    pub fn version_mismatch(key: impl Into<String>) -> Self {
        Self::VersionMismatch { key: key.into() }
    }

    /// Create a partition unavailable error
    pub fn partition_unavailable(partition_id: u32, reason: impl Into<String>) -> Self {
        Self::PartitionUnavailable {
            partition_id,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a generic engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Errors raised by the client before or around the network call.
    ///
    /// These are always returned to the caller; the session-wide exception
    /// suppression only applies to engine-reported errors.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::InvalidArgument(_)
                | Self::CategoryExhausted { .. }
                | Self::Serialization(_)
                | Self::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::Serialization(error.to_string())
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(error: config::ConfigError) -> Self {
        CacheError::Configuration(error.to_string())
    }
}

//! # Cache Session Configuration
//!
//! Settings for a [`CacheSession`](crate::session::CacheSession): exception
//! behaviour, enumeration chunking, lock defaults, registry limits and the
//! async operation workers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cache_session::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, then `cache-session.toml` if present, then CACHE_SESSION__* variables
//! let manager = ConfigManager::load()?;
//! let chunk_size = manager.config().enumeration.chunk_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::registry::MAX_TOKENS_PER_CATEGORY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root session configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the cache this session talks to
    pub cache_id: String,

    /// Surface engine-reported errors instead of returning sentinels
    pub exceptions_enabled: bool,

    /// Deadline for draining queued async operations
    pub request_timeout_ms: u64,

    pub enumeration: EnumerationConfig,

    pub locking: LockingConfig,

    pub registry: RegistryConfig,

    pub async_operations: AsyncOperationsConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_id: "default".to_string(),
            exceptions_enabled: true,
            request_timeout_ms: 30_000,
            enumeration: EnumerationConfig::default(),
            locking: LockingConfig::default(),
            registry: RegistryConfig::default(),
            async_operations: AsyncOperationsConfig::default(),
        }
    }
}

/// Chunked enumeration settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnumerationConfig {
    /// Entries requested per partition per chunk
    pub chunk_size: usize,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self { chunk_size: 1000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Lock duration used when none is given; 0 holds the lock until released
    pub default_lock_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Tokens each callback category may hand out over the session lifetime
    pub max_tokens_per_category: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_category: MAX_TOKENS_PER_CATEGORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AsyncOperationsConfig {
    pub worker_threads: usize,
    /// Operations that may wait in the queue before callers block
    pub queue_capacity: usize,
}

impl Default for AsyncOperationsConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            queue_capacity: 1024,
        }
    }
}

impl SessionConfig {
    /// Default configuration for `cache_id`
    pub fn for_cache(cache_id: impl Into<String>) -> Self {
        Self {
            cache_id: cache_id.into(),
            ..Self::default()
        }
    }

    pub fn default_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.default_lock_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.cache_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "cache_id",
                "session configuration",
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "request_timeout_ms",
                "0",
                "request timeout must be greater than 0",
            ));
        }

        if self.enumeration.chunk_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "enumeration.chunk_size",
                "0",
                "chunk size must be greater than 0",
            ));
        }

        let max_tokens = self.registry.max_tokens_per_category;
        if max_tokens == 0 || max_tokens > MAX_TOKENS_PER_CATEGORY {
            return Err(ConfigurationError::invalid_value(
                "registry.max_tokens_per_category",
                max_tokens.to_string(),
                format!("must be between 1 and {MAX_TOKENS_PER_CATEGORY}"),
            ));
        }

        if self.async_operations.worker_threads == 0 {
            return Err(ConfigurationError::invalid_value(
                "async_operations.worker_threads",
                "0",
                "at least one worker thread is required",
            ));
        }

        if self.async_operations.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "async_operations.queue_capacity",
                "0",
                "queue capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cache Session
//!
//! Client-side session runtime for a distributed cache.
//!
//! ## Overview
//!
//! A [`CacheSession`] issues get/insert/remove/enumerate operations against a
//! remote cache engine reached through the [`RemoteEngine`] trait, and owns
//! the client-side state the engine cannot keep for it:
//!
//! - callback handlers translated into compact per-category tokens
//! - lock handles and item versions for pessimistic and optimistic concurrency
//! - enumeration pointers for chunked traversal of a partitioned key space
//! - selective and cache-wide event subscriptions with payload filters
//!
//! ## Module Organization
//!
//! - [`registry`] - Ref-counted handler/token registry, one token space per category
//! - [`access`] - Access modes, lock handles, versions and expirations
//! - [`enumeration`] - Pointer sets, chunk/abandon protocol and the lazy enumerator
//! - [`events`] - Event kinds, filters and the event multiplexer
//! - [`engine`] - The engine interface plus an in-memory implementation
//! - [`session`] - The session facade and its async variants
//! - [`serialization`] - Value encoding with flags carried untouched
//! - [`config`] - Layered configuration loading
//! - [`logging`] - Structured logging setup and helpers
//! - [`error`] - Crate-wide error type
//!
//! ## Quick Start
//!
//! ```rust
//! use cache_session::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = Arc::new(InMemoryEngine::new("inventory"));
//! let session = CacheSession::new(engine, SessionConfig::for_cache("inventory")).unwrap();
//!
//! session.insert("sku:1", &10u32).unwrap();
//! let (stock, handle) = session
//!     .get_with_lock::<u32>("sku:1", Duration::from_secs(5))
//!     .unwrap()
//!     .unwrap();
//! session
//!     .insert_with(
//!         "sku:1",
//!         &(stock - 1),
//!         InsertOptions::new().access(AccessRequest::release(handle)),
//!     )
//!     .unwrap();
//! assert_eq!(session.get::<u32>("sku:1").unwrap(), Some(9));
//! ```

pub mod access;
pub mod config;
pub mod engine;
pub mod enumeration;
pub mod error;
pub mod events;
pub mod logging;
pub mod registry;
pub mod serialization;
pub mod session;

pub use access::{AccessMode, AccessRequest, Expiration, ItemPriority, ItemVersion, LockHandle};
pub use config::{ConfigManager, SessionConfig};
pub use engine::{InMemoryEngine, RemoteEngine};
pub use enumeration::{CacheEnumerator, EnumerationCursor, EnumerationScope};
pub use error::{CacheError, Result};
pub use events::{
    CacheEvent, CacheEventDescriptor, EventCallback, EventDataFilter, EventMask, EventType,
};
pub use registry::{CallbackCategory, CallbackToken, TokenRegistry};
pub use serialization::{EncodedValue, JsonSerializer, Serializer, ValueFlags};
pub use session::{AsyncCallback, CacheSession, InsertOptions, ReadResult};

/// Commonly used types in one import
pub mod prelude {
    pub use crate::access::{AccessMode, AccessRequest, Expiration, ItemVersion, LockHandle};
    pub use crate::config::SessionConfig;
    pub use crate::engine::{InMemoryEngine, RemoteEngine};
    pub use crate::error::{CacheError, Result};
    pub use crate::events::{EventCallback, EventDataFilter, EventType};
    pub use crate::session::{CacheSession, InsertOptions, ReadResult};
}

//! # Cache Events
//!
//! Event kinds, payload filters, and the [`EventMultiplexer`] that routes
//! engine notifications to application callbacks.

pub mod descriptor;
pub mod multiplexer;
pub mod types;

pub use descriptor::{CacheEventDescriptor, ItemCallback, SelectiveTokens};
pub use multiplexer::{general_category, EventMultiplexer, MultiplexerStats};
pub use types::{
    CacheEvent, EventCacheItem, EventCallback, EventDataFilter, EventMask, EventType,
    RemovedReason,
};

//! # Chunked Enumeration
//!
//! Turns a large, partitioned key space into a boundable traversal.
//!
//! ```text
//! CacheEnumerator<T>          (lazy Iterator<Item = Result<(String, T)>>)
//! └── EnumerationCursor       (pointer set, chunk/abandon protocol)
//!     └── EnumerationPointer  (one immutable snapshot per partition)
//! ```
//!
//! Traversals are restartable only by beginning a new cursor; pointer state
//! is never persisted.

pub mod cursor;
pub mod enumerator;
pub mod pointer;

pub use cursor::{ChunkBatch, EnumerationCursor};
pub use enumerator::CacheEnumerator;
pub use pointer::{
    EnumerationChunk, EnumerationPointer, EnumerationScope, PartitionChunk, PartitionId,
};

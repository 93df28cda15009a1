//! Enumeration pointers: per-partition continuation state of a traversal.

use crate::error::Result;
use crate::serialization::EncodedValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Partition or data source contributing to the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a traversal covers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumerationScope {
    /// The whole key space
    #[default]
    All,
    /// Items written with the given group (and optional sub-group)
    Group {
        group: String,
        sub_group: Option<String>,
    },
}

/// Immutable snapshot of one partition's traversal position.
///
/// Pointers are never mutated in place: every chunk answer produces a new
/// snapshot that replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationPointer {
    cursor_id: Uuid,
    partition_id: PartitionId,
    cursor_state: Vec<u8>,
    exhausted: bool,
    disposable: bool,
}

impl EnumerationPointer {
    /// Pointer positioned before the first entry of `partition_id`
    pub fn start(cursor_id: Uuid, partition_id: PartitionId) -> Self {
        Self {
            cursor_id,
            partition_id,
            cursor_state: Vec::new(),
            exhausted: false,
            disposable: false,
        }
    }

    pub fn cursor_id(&self) -> Uuid {
        self.cursor_id
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Opaque position understood only by the engine
    pub fn cursor_state(&self) -> &[u8] {
        &self.cursor_state
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_disposable(&self) -> bool {
        self.disposable
    }

    /// True before the first chunk has been served
    pub fn is_fresh(&self) -> bool {
        self.cursor_state.is_empty() && !self.exhausted
    }

    /// Successor snapshot after the engine served a chunk
    pub fn advanced(&self, cursor_state: Vec<u8>, exhausted: bool) -> Self {
        Self {
            cursor_id: self.cursor_id,
            partition_id: self.partition_id,
            cursor_state,
            exhausted,
            disposable: false,
        }
    }

    /// Copy flagged so the engine releases its iteration state
    pub fn disposed(&self) -> Self {
        Self {
            disposable: true,
            ..self.clone()
        }
    }
}

/// Entries served for one pointer, plus the pointer's successor
#[derive(Debug, Clone)]
pub struct EnumerationChunk {
    pub pointer: EnumerationPointer,
    pub entries: Vec<(String, EncodedValue)>,
}

/// Per-partition answer to a chunk request
#[derive(Debug, Clone)]
pub struct PartitionChunk {
    pub partition_id: PartitionId,
    pub result: Result<EnumerationChunk>,
}

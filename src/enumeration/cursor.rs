//! # Enumeration Cursor
//!
//! Chunked, resumable traversal over a partitioned key space.
//!
//! A cursor holds one [`EnumerationPointer`] per contributing partition. Each
//! [`EnumerationCursor::next_chunk`] call sends the open pointers to the
//! engine and replaces the pointer set wholesale with the successors it gets
//! back. The traversal ends naturally once every pointer is exhausted.
//!
//! Any other ending (fetch error, early drop, explicit abandon) flags the
//! still-open pointers as disposable and reissues one best-effort chunk
//! request so the engine can release its iteration state. Failures of that
//! cleanup call are logged and swallowed.

use super::pointer::{EnumerationPointer, EnumerationScope, PartitionId};
use crate::engine::RemoteEngine;
use crate::error::{CacheError, Result};
use crate::logging::log_enumeration_operation;
use crate::serialization::EncodedValue;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Entries and per-partition failures produced by one chunk request
#[derive(Debug, Default)]
pub struct ChunkBatch {
    pub entries: Vec<(String, EncodedValue)>,
    pub failures: Vec<CacheError>,
    /// No further chunks will be produced
    pub complete: bool,
}

#[derive(Debug)]
struct CursorState {
    pointers: Arc<Vec<EnumerationPointer>>,
    /// Pointers whose partition failed; still open on the engine side
    failed: Vec<EnumerationPointer>,
    finished: bool,
}

/// In-progress traversal owned by a single logical enumeration
pub struct EnumerationCursor {
    id: Uuid,
    scope: EnumerationScope,
    engine: Arc<dyn RemoteEngine>,
    chunk_size: usize,
    state: Mutex<CursorState>,
}

impl EnumerationCursor {
    /// Start a traversal of `scope`
    pub fn begin(
        engine: Arc<dyn RemoteEngine>,
        scope: EnumerationScope,
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CacheError::invalid_argument(
                "enumeration chunk size must be greater than zero",
            ));
        }

        let id = Uuid::new_v4();
        let partitions = engine.enumeration_partitions(&scope)?;
        let pointers: Vec<EnumerationPointer> = partitions
            .into_iter()
            .map(|partition_id| EnumerationPointer::start(id, partition_id))
            .collect();

        log_enumeration_operation("begin", &id, pointers.len(), "started", None);

        Ok(Self {
            id,
            scope,
            engine,
            chunk_size,
            state: Mutex::new(CursorState {
                finished: pointers.is_empty(),
                pointers: Arc::new(pointers),
                failed: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &EnumerationScope {
        &self.scope
    }

    /// Current pointer snapshot
    pub fn pointers(&self) -> Arc<Vec<EnumerationPointer>> {
        Arc::clone(&self.state.lock().pointers)
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Partitions that failed during the traversal so far
    pub fn failed_partitions(&self) -> Vec<PartitionId> {
        self.state
            .lock()
            .failed
            .iter()
            .map(EnumerationPointer::partition_id)
            .collect()
    }

    /// Request the next bounded batch of entries
    pub fn next_chunk(&self) -> Result<ChunkBatch> {
        let mut state = self.state.lock();
        if state.finished {
            return Ok(ChunkBatch {
                complete: true,
                ..ChunkBatch::default()
            });
        }

        let open: Vec<EnumerationPointer> = state
            .pointers
            .iter()
            .filter(|pointer| !pointer.is_exhausted())
            .cloned()
            .collect();

        let chunks = match self.engine.fetch_chunk(&self.scope, &open, self.chunk_size) {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(cursor_id = %self.id, error = %error, "Chunk fetch failed, abandoning traversal");
                self.abandon_locked(&mut state);
                return Err(error);
            }
        };

        let mut batch = ChunkBatch::default();
        let current = Arc::clone(&state.pointers);
        let mut successors = Vec::with_capacity(current.len());
        let mut failed_now = Vec::new();

        for pointer in current.iter() {
            if pointer.is_exhausted() {
                successors.push(pointer.clone());
                continue;
            }

            let answer = chunks
                .iter()
                .find(|chunk| chunk.partition_id == pointer.partition_id());

            match answer.map(|chunk| &chunk.result) {
                Some(Ok(chunk)) => {
                    batch.entries.extend(chunk.entries.iter().cloned());
                    successors.push(chunk.pointer.clone());
                }
                Some(Err(error)) => {
                    warn!(
                        cursor_id = %self.id,
                        partition_id = %pointer.partition_id(),
                        error = %error,
                        "Partition failed during enumeration"
                    );
                    batch.failures.push(error.clone());
                    failed_now.push(pointer.clone());
                }
                None => {
                    let error = CacheError::partition_unavailable(
                        pointer.partition_id().value(),
                        "engine returned no chunk for the partition",
                    );
                    warn!(cursor_id = %self.id, partition_id = %pointer.partition_id(), "Missing chunk answer");
                    batch.failures.push(error);
                    failed_now.push(pointer.clone());
                }
            }
        }

        state.failed.extend(failed_now);
        state.pointers = Arc::new(successors);

        if state.pointers.iter().all(EnumerationPointer::is_exhausted) {
            batch.complete = true;
            state.finished = true;
            if !state.failed.is_empty() {
                let leftovers: Vec<EnumerationPointer> = state.failed.clone();
                self.release(&leftovers);
            }
            log_enumeration_operation(
                "complete",
                &self.id,
                state.pointers.len(),
                "exhausted",
                None,
            );
        }

        debug!(
            cursor_id = %self.id,
            entries = batch.entries.len(),
            failures = batch.failures.len(),
            complete = batch.complete,
            "Served enumeration chunk"
        );
        Ok(batch)
    }

    /// End the traversal early and let the engine release its state
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        self.abandon_locked(&mut state);
    }

    fn abandon_locked(&self, state: &mut CursorState) {
        if state.finished {
            return;
        }
        state.finished = true;

        let mut leftovers: Vec<EnumerationPointer> = state
            .pointers
            .iter()
            .filter(|pointer| !pointer.is_exhausted())
            .cloned()
            .collect();
        leftovers.extend(state.failed.iter().cloned());

        if !leftovers.is_empty() {
            self.release(&leftovers);
        }
        log_enumeration_operation("abandon", &self.id, leftovers.len(), "abandoned", None);
    }

    /// Best-effort disposal request; errors are swallowed
    fn release(&self, pointers: &[EnumerationPointer]) {
        let disposable: Vec<EnumerationPointer> =
            pointers.iter().map(EnumerationPointer::disposed).collect();

        if let Err(error) = self.engine.fetch_chunk(&self.scope, &disposable, 0) {
            log_enumeration_operation(
                "release",
                &self.id,
                disposable.len(),
                "cleanup_failed",
                Some(&error.to_string()),
            );
        }
    }
}

impl Drop for EnumerationCursor {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for EnumerationCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumerationCursor")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

//! Lazy `(key, value)` iterator on top of an [`EnumerationCursor`].

use super::cursor::EnumerationCursor;
use crate::error::{CacheError, Result};
use crate::serialization::{decode, EncodedValue, Serializer};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Iterator over the entries of a traversal.
///
/// Partition failures are yielded as `Err` items (once each) when errors are
/// surfaced, and logged otherwise. Dropping the enumerator before it is
/// exhausted abandons the traversal.
pub struct CacheEnumerator<T> {
    cursor: EnumerationCursor,
    serializer: Arc<dyn Serializer>,
    buffer: VecDeque<(String, EncodedValue)>,
    pending_errors: VecDeque<CacheError>,
    surface_errors: bool,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> CacheEnumerator<T> {
    pub fn new(
        cursor: EnumerationCursor,
        serializer: Arc<dyn Serializer>,
        surface_errors: bool,
    ) -> Self {
        let done = cursor.is_finished();
        Self {
            cursor,
            serializer,
            buffer: VecDeque::new(),
            pending_errors: VecDeque::new(),
            surface_errors,
            done,
            _marker: PhantomData,
        }
    }

    pub fn cursor(&self) -> &EnumerationCursor {
        &self.cursor
    }

    /// Stop the traversal now instead of waiting for drop
    pub fn abandon(mut self) {
        self.done = true;
        self.buffer.clear();
        self.cursor.abandon();
    }

    fn fill(&mut self) -> Option<CacheError> {
        match self.cursor.next_chunk() {
            Ok(batch) => {
                self.buffer.extend(batch.entries);
                for failure in batch.failures {
                    if self.surface_errors {
                        self.pending_errors.push_back(failure);
                    } else {
                        warn!(error = %failure, "Suppressed partition failure during enumeration");
                    }
                }
                self.done = batch.complete;
                None
            }
            Err(error) => {
                self.done = true;
                if self.surface_errors {
                    Some(error)
                } else {
                    warn!(error = %error, "Suppressed enumeration failure");
                    None
                }
            }
        }
    }
}

impl<T: DeserializeOwned> Iterator for CacheEnumerator<T> {
    type Item = Result<(String, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(error) = self.pending_errors.pop_front() {
                return Some(Err(error));
            }
            if let Some((key, encoded)) = self.buffer.pop_front() {
                return Some(decode(self.serializer.as_ref(), &encoded).map(|value| (key, value)));
            }
            if self.done {
                return None;
            }
            if let Some(error) = self.fill() {
                return Some(Err(error));
            }
        }
    }
}

impl<T> std::fmt::Debug for CacheEnumerator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEnumerator")
            .field("cursor", &self.cursor)
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish()
    }
}

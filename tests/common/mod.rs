//! Shared fixtures for session integration tests

#![allow(dead_code)]

use cache_session::config::SessionConfig;
use cache_session::engine::InMemoryEngine;
use cache_session::events::{CacheEvent, EventCallback};
use cache_session::session::CacheSession;
use parking_lot::Mutex;
use std::sync::Arc;

pub fn session_with_engine(engine: Arc<InMemoryEngine>) -> CacheSession {
    let config = SessionConfig::for_cache(engine.cache_id());
    CacheSession::new(engine, config).expect("session should open")
}

pub fn session() -> (Arc<InMemoryEngine>, CacheSession) {
    let engine = Arc::new(InMemoryEngine::new("integration"));
    let session = session_with_engine(engine.clone());
    (engine, session)
}

pub fn partitioned_session(partitions: u32, chunk_size: usize) -> (Arc<InMemoryEngine>, CacheSession) {
    let engine = Arc::new(InMemoryEngine::with_partitions("integration", partitions));
    let mut config = SessionConfig::for_cache("integration");
    config.enumeration.chunk_size = chunk_size;
    let session = CacheSession::new(engine.clone(), config).expect("session should open");
    (engine, session)
}

/// Callback that records every event it receives
pub fn recording_callback() -> (EventCallback, Arc<Mutex<Vec<CacheEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback = EventCallback::new(move |event| sink.lock().push(event.clone()));
    (callback, events)
}

/// Keys spread over every partition of `engine`, `per_partition` each
pub fn keys_per_partition(engine: &InMemoryEngine, per_partition: usize) -> Vec<String> {
    let mut counts = vec![0usize; engine.partition_count() as usize];
    let mut keys = Vec::new();
    let mut candidate = 0u32;
    while counts.iter().any(|count| *count < per_partition) {
        let key = format!("item:{candidate:04}");
        let index = engine.partition_of(&key).value() as usize - 1;
        if counts[index] < per_partition {
            counts[index] += 1;
            keys.push(key);
        }
        candidate += 1;
    }
    keys
}

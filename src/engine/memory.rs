//! # In-Memory Engine
//!
//! A single-process [`RemoteEngine`] that partitions keys by hash and keeps
//! everything in memory.
//!
//! ## Overview
//!
//! Used by the test suite and for local development. It implements the same
//! lock, version, expiration and notification semantics a clustered engine
//! exposes to the session, plus hooks to inject failures and inspect call
//! counts.
//!
//! ## Key Features
//!
//! - **Hash partitioning**: Keys are spread over a fixed number of partitions,
//!   numbered from 1
//! - **Engine-owned locks**: Lock ids are UUIDs; locks may carry a timeout
//! - **Lazy expiration**: Expired items are dropped on access and reported as
//!   removed with [`RemovedReason::Expired`]
//! - **Failure injection**: Partitions can fail after serving a number of
//!   chunks, and whole fetch calls can be failed
//! - **Call accounting**: Every trait call is counted in [`EngineCallCounts`]
//!
//! Notifications are collected while partition state is locked and delivered
//! after every lock is released.
//!
//! The engine serves one session at a time: it routes every notification to
//! a single attached listener, and disposing the session drops every key
//! registration and subscription. Attaching a second listener replaces the
//! first.

use super::types::{
    EngineNotification, EngineSubscriptionId, GetRequest, GetResponse, InsertRequest,
    InsertResponse, ItemMetadata, KeyNotification, NotificationPayload, NotificationTarget,
    ReadOutcome, RemoveRequest, StoredItem,
};
use super::{NotificationListener, RemoteEngine};
use crate::access::{AccessMode, AccessRequest, ItemVersion, LockHandle};
use crate::enumeration::{
    EnumerationChunk, EnumerationPointer, EnumerationScope, PartitionChunk, PartitionId,
};
use crate::error::{CacheError, Result};
use crate::events::{EventDataFilter, EventType, RemovedReason};
use crate::registry::CallbackCategory;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default number of partitions
pub const DEFAULT_PARTITION_COUNT: u32 = 4;

/// Snapshot of how often each engine operation was called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCallCounts {
    pub total: usize,
    pub get: usize,
    pub insert: usize,
    pub remove: usize,
    pub lock: usize,
    pub unlock: usize,
    pub fetch_chunk: usize,
    /// `fetch_chunk` calls made only to release iteration state
    pub releases: usize,
    pub key_registrations: usize,
    pub general_registrations: usize,
}

#[derive(Debug, Default)]
struct CallCounters {
    total: AtomicUsize,
    get: AtomicUsize,
    insert: AtomicUsize,
    remove: AtomicUsize,
    lock: AtomicUsize,
    unlock: AtomicUsize,
    fetch_chunk: AtomicUsize,
    releases: AtomicUsize,
    key_registrations: AtomicUsize,
    general_registrations: AtomicUsize,
}

impl CallCounters {
    fn bump(&self, counter: &AtomicUsize) {
        self.total.fetch_add(1, Ordering::Relaxed);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineCallCounts {
        EngineCallCounts {
            total: self.total.load(Ordering::Relaxed),
            get: self.get.load(Ordering::Relaxed),
            insert: self.insert.load(Ordering::Relaxed),
            remove: self.remove.load(Ordering::Relaxed),
            lock: self.lock.load(Ordering::Relaxed),
            unlock: self.unlock.load(Ordering::Relaxed),
            fetch_chunk: self.fetch_chunk.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            key_registrations: self.key_registrations.load(Ordering::Relaxed),
            general_registrations: self.general_registrations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct LockState {
    handle: LockHandle,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Entry {
    item: StoredItem,
    lock: Option<LockState>,
    last_accessed: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let expiration = &self.item.metadata.expiration;
        if let Some(at) = expiration.absolute {
            if at <= now {
                return true;
            }
        }
        match expiration.sliding_window().map(chrono::Duration::from_std) {
            Some(Ok(window)) => self.last_accessed + window <= now,
            _ => false,
        }
    }

    /// Current lock, dropping it first when its timeout has passed
    fn active_lock(&mut self, now: DateTime<Utc>) -> Option<&LockState> {
        if matches!(&self.lock, Some(lock) if lock.expires_at.is_some_and(|at| at <= now)) {
            self.lock = None;
        }
        self.lock.as_ref()
    }

    fn is_locked_by_other(&mut self, handle: &LockHandle, now: DateTime<Utc>) -> bool {
        matches!(self.active_lock(now), Some(lock) if lock.handle.lock_id() != handle.lock_id())
    }

    fn is_locked_by(&mut self, handle: &LockHandle, now: DateTime<Utc>) -> bool {
        matches!(self.active_lock(now), Some(lock) if lock.handle.lock_id() == handle.lock_id())
    }

    fn matches_scope(&self, scope: &EnumerationScope) -> bool {
        match scope {
            EnumerationScope::All => true,
            EnumerationScope::Group { group, sub_group } => {
                let metadata = &self.item.metadata;
                metadata.group.as_deref() == Some(group.as_str())
                    && (sub_group.is_none() || metadata.sub_group == *sub_group)
            }
        }
    }
}

/// Work queued while partition state is locked
#[derive(Debug, Default)]
struct Outbox {
    notifications: Vec<EngineNotification>,
    /// Keys whose registrations were dropped along with the item
    dropped_keys: Vec<String>,
}

impl Extend<EngineNotification> for Outbox {
    fn extend<I: IntoIterator<Item = EngineNotification>>(&mut self, iter: I) {
        self.notifications.extend(iter);
    }
}

impl From<Vec<EngineNotification>> for Outbox {
    fn from(notifications: Vec<EngineNotification>) -> Self {
        Self {
            notifications,
            dropped_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Partition {
    entries: BTreeMap<String, Entry>,
}

#[derive(Debug, Clone, Copy)]
struct FailurePlan {
    remaining_chunks: usize,
}

/// Single-process, single-session engine with hash partitioning and failure
/// injection
pub struct InMemoryEngine {
    cache_id: String,
    partitions: Vec<Mutex<Partition>>,
    key_notifications: Mutex<HashMap<String, Vec<KeyNotification>>>,
    general: Mutex<HashMap<EngineSubscriptionId, (EventType, EventDataFilter)>>,
    listener: RwLock<Option<Arc<dyn NotificationListener>>>,
    open_iterations: Mutex<HashSet<(Uuid, PartitionId)>>,
    partition_failures: Mutex<HashMap<PartitionId, FailurePlan>>,
    rejected_registrations: Mutex<HashSet<String>>,
    fail_fetches: AtomicBool,
    next_version: AtomicU64,
    next_subscription: AtomicU64,
    counters: CallCounters,
}

impl InMemoryEngine {
    pub fn new(cache_id: impl Into<String>) -> Self {
        Self::with_partitions(cache_id, DEFAULT_PARTITION_COUNT)
    }

    /// Engine with `partition_count` partitions (at least one)
    pub fn with_partitions(cache_id: impl Into<String>, partition_count: u32) -> Self {
        let partition_count = partition_count.max(1);
        Self {
            cache_id: cache_id.into(),
            partitions: (0..partition_count)
                .map(|_| Mutex::new(Partition::default()))
                .collect(),
            key_notifications: Mutex::new(HashMap::new()),
            general: Mutex::new(HashMap::new()),
            listener: RwLock::new(None),
            open_iterations: Mutex::new(HashSet::new()),
            partition_failures: Mutex::new(HashMap::new()),
            rejected_registrations: Mutex::new(HashSet::new()),
            fail_fetches: AtomicBool::new(false),
            next_version: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            counters: CallCounters::default(),
        }
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Partition a key is stored in
    pub fn partition_of(&self, key: &str) -> PartitionId {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = hasher.finish() % self.partitions.len() as u64;
        PartitionId::new(index as u32 + 1)
    }

    pub fn call_counts(&self) -> EngineCallCounts {
        self.counters.snapshot()
    }

    /// Iterations the engine still holds state for
    pub fn open_iteration_count(&self) -> usize {
        self.open_iterations.lock().len()
    }

    /// Make `partition` fail every chunk request after serving
    /// `after_chunks` more chunks
    pub fn fail_partition(&self, partition: PartitionId, after_chunks: usize) {
        self.partition_failures.lock().insert(
            partition,
            FailurePlan {
                remaining_chunks: after_chunks,
            },
        );
    }

    pub fn heal_partition(&self, partition: PartitionId) {
        self.partition_failures.lock().remove(&partition);
    }

    /// Fail every non-release `fetch_chunk` call as a whole
    /// Fail every later key registration for `key`
    pub fn reject_key_registrations(&self, key: impl Into<String>) {
        self.rejected_registrations.lock().insert(key.into());
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Number of live key registrations for `key`
    pub fn key_registration_count(&self, key: &str) -> usize {
        self.key_notifications
            .lock()
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn general_subscription_count(&self) -> usize {
        self.general.lock().len()
    }

    /// Push a notification to the attached listener as if it came off the wire
    pub fn deliver(&self, notification: EngineNotification) {
        self.deliver_all(vec![notification].into());
    }

    /// Raise a cache-level event for every subscription of its type
    pub fn publish(&self, event_type: EventType, custom_data: Option<serde_json::Value>) {
        let payload = NotificationPayload {
            custom_data,
            ..NotificationPayload::default()
        };
        let notifications = self.general_notifications(event_type, None, &payload);
        self.deliver_all(notifications.into());
    }

    fn partition(&self, key: &str) -> &Mutex<Partition> {
        let index = self.partition_of(key).value() as usize - 1;
        &self.partitions[index]
    }

    fn partition_by_id(&self, partition: PartitionId) -> Option<&Mutex<Partition>> {
        (partition.value() as usize)
            .checked_sub(1)
            .and_then(|index| self.partitions.get(index))
    }

    fn allocate_version(&self) -> ItemVersion {
        ItemVersion::new(self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    fn new_lock(&self, timeout: Option<Duration>, now: DateTime<Utc>) -> LockState {
        let expires_at = timeout
            .filter(|timeout| !timeout.is_zero())
            .and_then(|timeout| chrono::Duration::from_std(timeout).ok())
            .map(|timeout| now + timeout);
        LockState {
            handle: LockHandle::new(Uuid::new_v4().to_string(), now),
            expires_at,
        }
    }

    /// Drop `key` if it expired, queueing the removal notifications
    fn purge_expired(
        &self,
        partition: &mut Partition,
        key: &str,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) {
        let expired = partition
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(now));
        if !expired {
            return;
        }
        if let Some(entry) = partition.entries.remove(key) {
            debug!(key = %key, "Item expired");
            self.removal_notifications(key, entry.item, RemovedReason::Expired, outbox);
        }
    }

    fn general_notifications(
        &self,
        event_type: EventType,
        key: Option<&str>,
        payload: &NotificationPayload,
    ) -> Vec<EngineNotification> {
        self.general
            .lock()
            .iter()
            .filter(|(_, (subscribed, _))| *subscribed == event_type)
            .map(|(id, (_, filter))| EngineNotification {
                target: NotificationTarget::Subscription(*id),
                event_type,
                key: key.map(str::to_string),
                filter: *filter,
                payload: payload.clone(),
            })
            .collect()
    }

    fn update_notifications(
        &self,
        key: &str,
        item: StoredItem,
        old_item: StoredItem,
    ) -> Vec<EngineNotification> {
        let payload = NotificationPayload {
            item: Some(item),
            old_item: Some(old_item),
            ..NotificationPayload::default()
        };
        let mut notifications: Vec<EngineNotification> = self
            .key_notifications
            .lock()
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|registration| {
                registration.update_token.map(|token| EngineNotification {
                    target: NotificationTarget::Token {
                        category: CallbackCategory::ItemUpdated,
                        token,
                    },
                    event_type: EventType::ItemUpdated,
                    key: Some(key.to_string()),
                    filter: registration.filter,
                    payload: payload.clone(),
                })
            })
            .collect();
        notifications.extend(self.general_notifications(
            EventType::ItemUpdated,
            Some(key),
            &payload,
        ));
        notifications
    }

    /// Queue removal notifications; key registrations die with the item
    fn removal_notifications(
        &self,
        key: &str,
        item: StoredItem,
        reason: RemovedReason,
        outbox: &mut Outbox,
    ) {
        let payload = NotificationPayload {
            item: Some(item),
            reason: Some(reason),
            ..NotificationPayload::default()
        };
        let registrations = self.key_notifications.lock().remove(key).unwrap_or_default();
        if !registrations.is_empty() {
            outbox.dropped_keys.push(key.to_string());
        }
        outbox.extend(registrations.into_iter().filter_map(|registration| {
            registration.remove_token.map(|token| EngineNotification {
                target: NotificationTarget::Token {
                    category: CallbackCategory::ItemRemoved,
                    token,
                },
                event_type: EventType::ItemRemoved,
                key: Some(key.to_string()),
                filter: registration.filter,
                payload: payload.clone(),
            })
        }));
        outbox.extend(self.general_notifications(
            EventType::ItemRemoved,
            Some(key),
            &payload,
        ));
    }

    /// Hand queued notifications to the listener, then report dropped keys
    fn deliver_all(&self, outbox: Outbox) {
        if outbox.notifications.is_empty() && outbox.dropped_keys.is_empty() {
            return;
        }
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            for notification in outbox.notifications {
                listener.on_notification(notification);
            }
            for key in &outbox.dropped_keys {
                listener.on_key_registrations_dropped(key);
            }
        }
    }

    /// Check a write against the current lock and version state
    fn check_write(
        key: &str,
        access: &AccessRequest,
        existing: Option<&mut Entry>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match (access.mode, existing) {
            (AccessMode::IgnoreLock, _) => Ok(()),
            (AccessMode::Default, Some(entry)) => match &access.lock_handle {
                Some(handle) if entry.is_locked_by_other(handle, now) => {
                    Err(CacheError::lock_conflict(key))
                }
                _ => Ok(()),
            },
            (AccessMode::Default, None) => Ok(()),
            (AccessMode::Release | AccessMode::DontRelease, Some(entry)) => {
                match &access.lock_handle {
                    Some(handle) if entry.is_locked_by(handle, now) => Ok(()),
                    _ => Err(CacheError::lock_conflict(key)),
                }
            }
            (AccessMode::Release | AccessMode::DontRelease, None) => {
                Err(CacheError::lock_conflict(key))
            }
            (AccessMode::CompareVersion, Some(entry)) => {
                if Some(entry.item.metadata.version) == access.version {
                    Ok(())
                } else {
                    Err(CacheError::version_mismatch(key))
                }
            }
            (AccessMode::CompareVersion, None) => Err(CacheError::version_mismatch(key)),
            (mode, _) => Err(CacheError::invalid_argument(format!(
                "mode {mode} is not valid for a write"
            ))),
        }
    }

    fn serve_chunk(
        &self,
        scope: &EnumerationScope,
        pointer: &EnumerationPointer,
        chunk_size: usize,
    ) -> Result<EnumerationChunk> {
        let partition_id = pointer.partition_id();
        {
            let mut failures = self.partition_failures.lock();
            if let Some(plan) = failures.get_mut(&partition_id) {
                if plan.remaining_chunks == 0 {
                    return Err(CacheError::partition_unavailable(
                        partition_id.value(),
                        "partition is not responding",
                    ));
                }
                plan.remaining_chunks -= 1;
            }
        }

        let partition = self.partition_by_id(partition_id).ok_or_else(|| {
            CacheError::partition_unavailable(partition_id.value(), "unknown partition")
        })?;

        let now = Utc::now();
        let last_key = String::from_utf8_lossy(pointer.cursor_state()).into_owned();
        let guard = partition.lock();
        let mut served: Vec<(String, crate::serialization::EncodedValue)> = guard
            .entries
            .iter()
            .filter(|(key, _)| pointer.is_fresh() || **key > last_key)
            .filter(|(_, entry)| !entry.is_expired(now) && entry.matches_scope(scope))
            .take(chunk_size + 1)
            .map(|(key, entry)| (key.clone(), entry.item.value.clone()))
            .collect();
        drop(guard);

        let exhausted = served.len() <= chunk_size;
        served.truncate(chunk_size);
        let cursor_state = served
            .last()
            .map(|(key, _)| key.as_bytes().to_vec())
            .unwrap_or_else(|| pointer.cursor_state().to_vec());

        let iteration = (pointer.cursor_id(), partition_id);
        if exhausted {
            self.open_iterations.lock().remove(&iteration);
        } else {
            self.open_iterations.lock().insert(iteration);
        }

        Ok(EnumerationChunk {
            pointer: pointer.advanced(cursor_state, exhausted),
            entries: served,
        })
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new("local")
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("cache_id", &self.cache_id)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl RemoteEngine for InMemoryEngine {
    fn get(&self, request: GetRequest) -> Result<GetResponse> {
        self.counters.bump(&self.counters.get);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let response = {
            let mut partition = self.partition(&request.key).lock();
            self.purge_expired(&mut partition, &request.key, now, &mut outbox);

            match partition.entries.get_mut(&request.key) {
                None => GetResponse {
                    outcome: ReadOutcome::NotFound,
                    lock_handle: None,
                },
                Some(entry) => {
                    entry.last_accessed = now;
                    let access = &request.access;
                    match access.mode {
                        AccessMode::Default => {
                            if let Some(handle) = &access.lock_handle {
                                if entry.is_locked_by_other(handle, now) {
                                    return Err(CacheError::lock_conflict(&request.key));
                                }
                            }
                            GetResponse {
                                outcome: ReadOutcome::Found(entry.item.clone()),
                                lock_handle: None,
                            }
                        }
                        AccessMode::IgnoreLock | AccessMode::GetVersion => GetResponse {
                            outcome: ReadOutcome::Found(entry.item.clone()),
                            lock_handle: None,
                        },
                        AccessMode::Acquire => {
                            if entry.active_lock(now).is_some() {
                                return Err(CacheError::lock_conflict(&request.key));
                            }
                            let lock = self.new_lock(access.lock_timeout, now);
                            let handle = lock.handle.clone();
                            entry.lock = Some(lock);
                            GetResponse {
                                outcome: ReadOutcome::Found(entry.item.clone()),
                                lock_handle: Some(handle),
                            }
                        }
                        AccessMode::DontAcquire => {
                            let outcome = if entry.active_lock(now).is_some() {
                                ReadOutcome::Locked
                            } else {
                                ReadOutcome::Found(entry.item.clone())
                            };
                            GetResponse {
                                outcome,
                                lock_handle: None,
                            }
                        }
                        AccessMode::MatchVersion => {
                            let current = entry.item.metadata.version;
                            let outcome = if Some(current) == access.version {
                                ReadOutcome::Unchanged(current)
                            } else {
                                ReadOutcome::Found(entry.item.clone())
                            };
                            GetResponse {
                                outcome,
                                lock_handle: None,
                            }
                        }
                        mode => {
                            return Err(CacheError::invalid_argument(format!(
                                "mode {mode} is not valid for a read"
                            )))
                        }
                    }
                }
            }
        };
        self.deliver_all(outbox);
        Ok(response)
    }

    fn get_bulk(&self, keys: &[String]) -> Result<HashMap<String, StoredItem>> {
        self.counters.bump(&self.counters.get);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let mut partition = self.partition(key).lock();
            self.purge_expired(&mut partition, key, now, &mut outbox);
            if let Some(entry) = partition.entries.get_mut(key) {
                entry.last_accessed = now;
                found.insert(key.clone(), entry.item.clone());
            }
        }
        self.deliver_all(outbox);
        Ok(found)
    }

    fn insert(&self, request: InsertRequest) -> Result<InsertResponse> {
        self.counters.bump(&self.counters.insert);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let version = {
            let mut partition = self.partition(&request.key).lock();
            self.purge_expired(&mut partition, &request.key, now, &mut outbox);

            let mut existing = partition.entries.get_mut(&request.key);
            if request.only_if_absent && existing.is_some() {
                drop(partition);
                self.deliver_all(outbox);
                return Err(CacheError::KeyExists {
                    key: request.key.clone(),
                });
            }
            if let Err(error) =
                Self::check_write(&request.key, &request.access, existing.as_deref_mut(), now)
            {
                drop(partition);
                self.deliver_all(outbox);
                return Err(error);
            }

            let version = self.allocate_version();
            let previous = existing.map(|entry| (entry.item.clone(), entry.lock.clone()));
            let created_at = previous
                .as_ref()
                .map(|(item, _)| item.metadata.created_at)
                .unwrap_or(now);
            let lock = match (&previous, request.access.mode) {
                (_, AccessMode::Release) => None,
                (Some((_, lock)), _) => lock.clone(),
                (None, _) => None,
            };
            let item = StoredItem {
                value: request.value.clone(),
                metadata: ItemMetadata {
                    version,
                    created_at,
                    last_modified: now,
                    expiration: request.expiration,
                    priority: request.priority,
                    group: request.group.clone(),
                    sub_group: request.sub_group.clone(),
                },
            };
            partition.entries.insert(
                request.key.clone(),
                Entry {
                    item: item.clone(),
                    lock,
                    last_accessed: now,
                },
            );

            match previous {
                Some((old_item, _)) => {
                    outbox.extend(self.update_notifications(&request.key, item, old_item))
                }
                None => {
                    let payload = NotificationPayload {
                        item: Some(item),
                        ..NotificationPayload::default()
                    };
                    outbox.extend(self.general_notifications(
                        EventType::ItemAdded,
                        Some(&request.key),
                        &payload,
                    ));
                }
            }

            // Each callback keeps its own payload filter
            let registrations = request
                .update_callback
                .map(|callback| KeyNotification {
                    update_token: Some(callback.token),
                    remove_token: None,
                    filter: callback.filter,
                })
                .into_iter()
                .chain(request.remove_callback.map(|callback| KeyNotification {
                    update_token: None,
                    remove_token: Some(callback.token),
                    filter: callback.filter,
                }));
            let mut key_notifications = self.key_notifications.lock();
            for registration in registrations {
                key_notifications
                    .entry(request.key.clone())
                    .or_default()
                    .push(registration);
            }
            drop(key_notifications);
            version
        };
        self.deliver_all(outbox);
        Ok(InsertResponse { version })
    }

    fn remove(&self, request: RemoveRequest) -> Result<Option<StoredItem>> {
        self.counters.bump(&self.counters.remove);
        let now = Utc::now();
        let mut outbox = Outbox::default();
        let removed = {
            let mut partition = self.partition(&request.key).lock();
            self.purge_expired(&mut partition, &request.key, now, &mut outbox);

            let existing = partition.entries.get_mut(&request.key);
            let check = match (request.access.mode, existing) {
                (AccessMode::CompareVersion, None) => {
                    Err(CacheError::version_mismatch(&request.key))
                }
                (_, None) => Ok(false),
                (_, Some(entry)) => {
                    Self::check_write(&request.key, &request.access, Some(entry), now).map(|_| true)
                }
            };
            match check {
                Ok(true) => partition.entries.remove(&request.key).map(|entry| {
                    self.removal_notifications(
                        &request.key,
                        entry.item.clone(),
                        RemovedReason::Removed,
                        &mut outbox,
                    );
                    entry.item
                }),
                Ok(false) => None,
                Err(error) => {
                    drop(partition);
                    self.deliver_all(outbox);
                    return Err(error);
                }
            }
        };
        self.deliver_all(outbox);
        Ok(removed)
    }

    fn lock(&self, key: &str, timeout: Duration) -> Result<Option<LockHandle>> {
        self.counters.bump(&self.counters.lock);
        let now = Utc::now();
        let mut partition = self.partition(key).lock();
        let Some(entry) = partition.entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        if entry.active_lock(now).is_some() {
            return Err(CacheError::lock_conflict(key));
        }
        let lock = self.new_lock(Some(timeout), now);
        let handle = lock.handle.clone();
        entry.lock = Some(lock);
        Ok(Some(handle))
    }

    fn unlock(&self, key: &str, handle: Option<&LockHandle>) -> Result<()> {
        self.counters.bump(&self.counters.unlock);
        let now = Utc::now();
        let mut partition = self.partition(key).lock();
        let Some(entry) = partition.entries.get_mut(key) else {
            return Ok(());
        };
        match handle {
            None => entry.lock = None,
            Some(handle) => {
                if entry.is_locked_by_other(handle, now) {
                    return Err(CacheError::lock_conflict(key));
                }
                entry.lock = None;
            }
        }
        Ok(())
    }

    fn lock_status(&self, key: &str) -> Result<Option<LockHandle>> {
        self.counters.bump(&self.counters.lock);
        let now = Utc::now();
        let mut partition = self.partition(key).lock();
        let Some(entry) = partition.entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        Ok(entry.active_lock(now).map(|lock| lock.handle.clone()))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.counters.bump(&self.counters.get);
        let now = Utc::now();
        let partition = self.partition(key).lock();
        Ok(partition
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    fn count(&self) -> Result<u64> {
        self.counters.bump(&self.counters.get);
        let now = Utc::now();
        let total = self
            .partitions
            .iter()
            .map(|partition| {
                partition
                    .lock()
                    .entries
                    .values()
                    .filter(|entry| !entry.is_expired(now))
                    .count() as u64
            })
            .sum();
        Ok(total)
    }

    fn clear(&self) -> Result<()> {
        self.counters.bump(&self.counters.remove);
        for partition in &self.partitions {
            partition.lock().entries.clear();
        }
        let dropped = std::mem::take(&mut *self.key_notifications.lock());
        let mut outbox = Outbox::from(self.general_notifications(
            EventType::CacheCleared,
            None,
            &NotificationPayload::default(),
        ));
        outbox.dropped_keys.extend(dropped.into_keys());
        self.deliver_all(outbox);
        Ok(())
    }

    fn enumeration_partitions(&self, scope: &EnumerationScope) -> Result<Vec<PartitionId>> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let ids = self
            .partitions
            .iter()
            .enumerate()
            .filter(|(_, partition)| match scope {
                EnumerationScope::All => true,
                EnumerationScope::Group { .. } => partition
                    .lock()
                    .entries
                    .values()
                    .any(|entry| !entry.is_expired(now) && entry.matches_scope(scope)),
            })
            .map(|(index, _)| PartitionId::new(index as u32 + 1))
            .collect();
        Ok(ids)
    }

    fn fetch_chunk(
        &self,
        scope: &EnumerationScope,
        pointers: &[EnumerationPointer],
        chunk_size: usize,
    ) -> Result<Vec<PartitionChunk>> {
        self.counters.bump(&self.counters.fetch_chunk);
        let releasing = !pointers.is_empty() && pointers.iter().all(|p| p.is_disposable());
        if releasing {
            self.counters.releases.fetch_add(1, Ordering::Relaxed);
        } else if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(CacheError::engine("chunk request failed"));
        }

        let chunks = pointers
            .iter()
            .map(|pointer| {
                let partition_id = pointer.partition_id();
                if pointer.is_disposable() {
                    self.open_iterations
                        .lock()
                        .remove(&(pointer.cursor_id(), partition_id));
                    return PartitionChunk {
                        partition_id,
                        result: Ok(EnumerationChunk {
                            pointer: pointer.advanced(pointer.cursor_state().to_vec(), true),
                            entries: Vec::new(),
                        }),
                    };
                }
                PartitionChunk {
                    partition_id,
                    result: self.serve_chunk(scope, pointer, chunk_size),
                }
            })
            .collect();
        Ok(chunks)
    }

    fn register_key_notification(&self, key: &str, notification: KeyNotification) -> Result<()> {
        self.counters.bump(&self.counters.key_registrations);
        if self.rejected_registrations.lock().contains(key) {
            return Err(CacheError::engine(format!("registration rejected for {key}")));
        }
        self.key_notifications
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(notification);
        Ok(())
    }

    fn unregister_key_notification(
        &self,
        key: &str,
        notification: KeyNotification,
    ) -> Result<()> {
        self.counters.bump(&self.counters.key_registrations);
        let mut registrations = self.key_notifications.lock();
        if let Some(entries) = registrations.get_mut(key) {
            entries.retain(|existing| {
                let update_matches = notification.update_token.is_some()
                    && existing.update_token == notification.update_token;
                let remove_matches = notification.remove_token.is_some()
                    && existing.remove_token == notification.remove_token;
                !(update_matches || remove_matches)
            });
            if entries.is_empty() {
                registrations.remove(key);
            }
        }
        Ok(())
    }

    fn register_general_notification(
        &self,
        event_type: EventType,
        filter: EventDataFilter,
    ) -> Result<EngineSubscriptionId> {
        self.counters.bump(&self.counters.general_registrations);
        let id = EngineSubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.general.lock().insert(id, (event_type, filter));
        Ok(id)
    }

    fn unregister_general_notification(&self, subscription: EngineSubscriptionId) -> Result<()> {
        self.counters.bump(&self.counters.general_registrations);
        self.general.lock().remove(&subscription);
        Ok(())
    }

    /// Route notifications to `listener`, replacing any listener already attached
    fn attach_listener(&self, listener: Arc<dyn NotificationListener>) {
        if self.listener.write().replace(listener).is_some() {
            warn!(
                cache_id = %self.cache_id,
                "Replacing the attached listener; this engine serves one session"
            );
        }
    }

    fn dispose_session(&self) -> Result<()> {
        self.key_notifications.lock().clear();
        self.general.lock().clear();
        self.open_iterations.lock().clear();
        *self.listener.write() = None;
        debug!(cache_id = %self.cache_id, "Session state released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Expiration;
    use crate::serialization::{EncodedValue, ValueFlags};

    fn insert_request(key: &str, access: AccessRequest) -> InsertRequest {
        InsertRequest {
            key: key.to_string(),
            value: EncodedValue::new(key.as_bytes().to_vec(), ValueFlags::JSON),
            expiration: Expiration::never(),
            priority: Default::default(),
            group: None,
            sub_group: None,
            access,
            update_callback: None,
            remove_callback: None,
            only_if_absent: false,
        }
    }

    fn get(engine: &InMemoryEngine, key: &str, access: AccessRequest) -> Result<GetResponse> {
        engine.get(GetRequest {
            key: key.to_string(),
            access,
        })
    }

    #[test]
    fn test_versions_increase_per_write() {
        let engine = InMemoryEngine::new("test");
        let first = engine
            .insert(insert_request("a", AccessRequest::default()))
            .unwrap();
        let second = engine
            .insert(insert_request("a", AccessRequest::default()))
            .unwrap();
        assert!(second.version.value() > first.version.value());
    }

    #[test]
    fn test_acquire_conflicts_until_released() {
        let engine = InMemoryEngine::new("test");
        engine
            .insert(insert_request("a", AccessRequest::default()))
            .unwrap();

        let response = get(&engine, "a", AccessRequest::acquire(Duration::ZERO)).unwrap();
        let handle = response.lock_handle.unwrap();

        assert_eq!(
            get(&engine, "a", AccessRequest::acquire(Duration::ZERO)).unwrap_err(),
            CacheError::lock_conflict("a")
        );
        assert!(matches!(
            get(&engine, "a", AccessRequest::dont_acquire()).unwrap().outcome,
            ReadOutcome::Locked
        ));

        engine.unlock("a", Some(&handle)).unwrap();
        assert!(matches!(
            get(&engine, "a", AccessRequest::dont_acquire()).unwrap().outcome,
            ReadOutcome::Found(_)
        ));
    }

    #[test]
    fn test_lock_timeout_expires() {
        let engine = InMemoryEngine::new("test");
        engine
            .insert(insert_request("a", AccessRequest::default()))
            .unwrap();
        engine.lock("a", Duration::from_millis(5)).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(engine.lock("a", Duration::ZERO).unwrap().is_some());
    }

    #[test]
    fn test_lock_missing_key() {
        let engine = InMemoryEngine::new("test");
        assert!(engine.lock("missing", Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_compare_version_write() {
        let engine = InMemoryEngine::new("test");
        let v1 = engine
            .insert(insert_request("a", AccessRequest::default()))
            .unwrap()
            .version;

        let stale = ItemVersion::new(v1.value() + 100);
        assert_eq!(
            engine
                .insert(insert_request("a", AccessRequest::compare_version(stale)))
                .unwrap_err(),
            CacheError::version_mismatch("a")
        );
        assert!(engine
            .insert(insert_request("a", AccessRequest::compare_version(v1)))
            .is_ok());
    }

    #[test]
    fn test_match_version_read_is_unchanged() {
        let engine = InMemoryEngine::new("test");
        let v1 = engine
            .insert(insert_request("a", AccessRequest::default()))
            .unwrap()
            .version;
        let response = get(&engine, "a", AccessRequest::match_version(v1)).unwrap();
        assert_eq!(response.outcome, ReadOutcome::Unchanged(v1));
    }

    #[test]
    fn test_only_if_absent() {
        let engine = InMemoryEngine::new("test");
        let mut request = insert_request("a", AccessRequest::default());
        request.only_if_absent = true;
        engine.insert(request.clone()).unwrap();
        assert!(matches!(
            engine.insert(request).unwrap_err(),
            CacheError::KeyExists { .. }
        ));
    }

    #[test]
    fn test_absolute_expiration_is_lazy() {
        let engine = InMemoryEngine::new("test");
        let mut request = insert_request("a", AccessRequest::default());
        request.expiration = Expiration::absolute(Utc::now() - chrono::Duration::seconds(1));
        engine.insert(request).unwrap();
        assert!(!engine.contains("a").unwrap());
        assert_eq!(engine.count().unwrap(), 0);
    }

    #[test]
    fn test_fetch_chunk_walks_partition() {
        let engine = InMemoryEngine::with_partitions("test", 1);
        for i in 0..5 {
            engine
                .insert(insert_request(&format!("k{i}"), AccessRequest::default()))
                .unwrap();
        }
        let cursor_id = Uuid::new_v4();
        let mut pointer = EnumerationPointer::start(cursor_id, PartitionId::new(1));
        let mut keys = Vec::new();
        while !pointer.is_exhausted() {
            let chunks = engine
                .fetch_chunk(&EnumerationScope::All, &[pointer.clone()], 2)
                .unwrap();
            let chunk = chunks.into_iter().next().unwrap().result.unwrap();
            keys.extend(chunk.entries.into_iter().map(|(key, _)| key));
            pointer = chunk.pointer;
        }
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
        assert_eq!(engine.open_iteration_count(), 0);
    }

    #[test]
    fn test_partition_failure_injection() {
        let engine = InMemoryEngine::with_partitions("test", 2);
        engine.fail_partition(PartitionId::new(2), 0);
        let cursor_id = Uuid::new_v4();
        let pointers = [
            EnumerationPointer::start(cursor_id, PartitionId::new(1)),
            EnumerationPointer::start(cursor_id, PartitionId::new(2)),
        ];
        let chunks = engine
            .fetch_chunk(&EnumerationScope::All, &pointers, 10)
            .unwrap();
        assert!(chunks[0].result.is_ok());
        assert!(matches!(
            chunks[1].result,
            Err(CacheError::PartitionUnavailable { partition_id: 2, .. })
        ));
    }

    #[derive(Default)]
    struct RecordingListener {
        notifications: Mutex<Vec<EngineNotification>>,
        dropped: Mutex<Vec<String>>,
    }

    impl NotificationListener for RecordingListener {
        fn on_notification(&self, notification: EngineNotification) {
            self.notifications.lock().push(notification);
        }

        fn on_key_registrations_dropped(&self, key: &str) {
            self.dropped.lock().push(key.to_string());
        }
    }

    fn update_only(token: u16) -> KeyNotification {
        KeyNotification {
            update_token: Some(crate::registry::CallbackToken::new(token)),
            remove_token: None,
            filter: EventDataFilter::None,
        }
    }

    #[test]
    fn test_lock_status_reports_active_lock() {
        let engine = InMemoryEngine::new("test");
        assert!(engine.lock_status("k").unwrap().is_none());
        engine
            .insert(insert_request("k", AccessRequest::default()))
            .unwrap();
        assert!(engine.lock_status("k").unwrap().is_none());

        let handle = engine.lock("k", Duration::from_secs(30)).unwrap().unwrap();
        let current = engine.lock_status("k").unwrap().unwrap();
        assert_eq!(current.lock_id(), handle.lock_id());

        engine.unlock("k", Some(&handle)).unwrap();
        assert!(engine.lock_status("k").unwrap().is_none());
    }

    #[test]
    fn test_removal_reports_dropped_registrations() {
        let engine = InMemoryEngine::new("test");
        let listener = Arc::new(RecordingListener::default());
        engine.attach_listener(listener.clone());
        engine
            .insert(insert_request("k", AccessRequest::default()))
            .unwrap();
        engine.register_key_notification("k", update_only(0)).unwrap();

        engine
            .remove(RemoveRequest {
                key: "k".to_string(),
                access: AccessRequest::default(),
            })
            .unwrap();

        // No removal token, so only the drop report reaches the listener
        assert!(listener.notifications.lock().is_empty());
        assert_eq!(*listener.dropped.lock(), vec!["k".to_string()]);
        assert_eq!(engine.key_registration_count("k"), 0);
    }

    #[test]
    fn test_second_listener_replaces_first() {
        let engine = InMemoryEngine::new("test");
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        engine.attach_listener(first.clone());
        engine.attach_listener(second.clone());
        engine
            .register_general_notification(EventType::Custom, EventDataFilter::None)
            .unwrap();

        engine.publish(EventType::Custom, None);
        assert!(first.notifications.lock().is_empty());
        assert_eq!(second.notifications.lock().len(), 1);

        engine.dispose_session().unwrap();
        engine.publish(EventType::Custom, None);
        assert_eq!(engine.general_subscription_count(), 0);
        assert_eq!(second.notifications.lock().len(), 1);
    }
}

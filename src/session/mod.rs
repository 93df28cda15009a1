//! # Cache Session
//!
//! The application-facing facade over a [`RemoteEngine`].
//!
//! ## Overview
//!
//! Every call follows the same sequence: validate arguments and the access
//! mode on the calling thread, acquire callback tokens where the call carries
//! handlers, make one engine call, and turn the engine's answer into public
//! types. Client-side validation failures never reach the engine.
//!
//! ## Error handling
//!
//! Engine-reported errors are returned to the caller while exceptions are
//! enabled (the default). With exceptions disabled the session returns a
//! sentinel instead (`None`, `false`, `0`, [`ItemVersion::NONE`]) and logs
//! the suppressed error. Client-side errors are always returned.
//!
//! ## Usage
//!
//! ```rust
//! use cache_session::config::SessionConfig;
//! use cache_session::engine::InMemoryEngine;
//! use cache_session::session::CacheSession;
//! use std::sync::Arc;
//!
//! let session = CacheSession::new(
//!     Arc::new(InMemoryEngine::new("orders")),
//!     SessionConfig::for_cache("orders"),
//! )
//! .unwrap();
//!
//! let version = session.insert("order:1", &42u32).unwrap();
//! let (value, current) = session.get_with_version::<u32>("order:1").unwrap().unwrap();
//! assert_eq!((value, current), (42, version));
//! ```

pub mod async_ops;
pub mod options;

use crate::access::{AccessMode, AccessRequest, ItemVersion, LockHandle, Operation};
use crate::config::SessionConfig;
use crate::engine::{
    GetRequest, InsertRequest, ReadOutcome, RemoteEngine, RemoveRequest, StoredItem,
};
use crate::enumeration::{CacheEnumerator, EnumerationCursor, EnumerationScope};
use crate::error::{CacheError, Result};
use crate::events::{
    CacheEventDescriptor, EventCallback, EventDataFilter, EventMask, EventMultiplexer,
    MultiplexerStats, SelectiveTokens,
};
use crate::logging::{log_cache_operation, log_error};
use crate::registry::{ClearScope, RegistryStats, TokenRegistry};
use crate::serialization::{decode, encode, EncodedValue, JsonSerializer, Serializer, ValueFlags};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use async_ops::{AsyncCallback, AsyncOperation, AsyncResult};
pub use options::{CacheItem, InsertOptions, ReadResult};

use async_ops::AsyncDispatcher;

/// Client session bound to one cache
pub struct CacheSession {
    config: SessionConfig,
    engine: RwLock<Option<Arc<dyn RemoteEngine>>>,
    serializer: Arc<dyn Serializer>,
    event_registry: Arc<TokenRegistry<EventCallback>>,
    multiplexer: Arc<EventMultiplexer>,
    async_ops: AsyncDispatcher,
    exceptions_enabled: AtomicBool,
}

impl CacheSession {
    /// Open a session with the default JSON serializer
    pub fn new(engine: Arc<dyn RemoteEngine>, config: SessionConfig) -> Result<Self> {
        Self::with_serializer(engine, config, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        engine: Arc<dyn RemoteEngine>,
        config: SessionConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        config.validate()?;

        let token_limit = config.registry.max_tokens_per_category;
        let event_registry = Arc::new(TokenRegistry::with_token_limit(token_limit));
        let multiplexer = Arc::new(EventMultiplexer::new(
            config.cache_id.clone(),
            Arc::clone(&event_registry),
            Arc::clone(&engine),
            Arc::clone(&serializer),
        ));
        engine.attach_listener(multiplexer.listener());

        let async_ops = AsyncDispatcher::start(
            config.async_operations.worker_threads,
            config.async_operations.queue_capacity,
            Arc::new(TokenRegistry::with_token_limit(token_limit)),
        )?;

        info!(
            cache_id = %config.cache_id,
            exceptions_enabled = config.exceptions_enabled,
            "Cache session initialized"
        );

        Ok(Self {
            exceptions_enabled: AtomicBool::new(config.exceptions_enabled),
            config,
            engine: RwLock::new(Some(engine)),
            serializer,
            event_registry,
            multiplexer,
            async_ops,
        })
    }

    pub fn cache_id(&self) -> &str {
        &self.config.cache_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn exceptions_enabled(&self) -> bool {
        self.exceptions_enabled.load(Ordering::SeqCst)
    }

    /// Session-wide switch between raising engine errors and returning sentinels
    pub fn set_exceptions_enabled(&self, enabled: bool) {
        self.exceptions_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.read().is_none()
    }

    fn engine(&self) -> Result<Arc<dyn RemoteEngine>> {
        self.engine.read().clone().ok_or(CacheError::NotInitialized)
    }

    /// Return `result`, or `sentinel` when an engine error is suppressed
    fn settle<T>(
        &self,
        operation: &str,
        key: Option<&str>,
        result: Result<T>,
        sentinel: impl FnOnce() -> T,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) if error.is_client_side() || self.exceptions_enabled() => {
                debug!(operation = %operation, key = ?key, error = %error, "Cache operation failed");
                Err(error)
            }
            Err(error) => {
                warn!(operation = %operation, key = ?key, error = %error, "Suppressed cache error");
                Ok(sentinel())
            }
        }
    }

    fn decode_item<T: DeserializeOwned>(&self, item: &StoredItem) -> Result<T> {
        decode(self.serializer.as_ref(), &item.value)
    }

    // Reads

    /// Plain read
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get_with(key, AccessRequest::default())?.into_value())
    }

    /// Read under an explicit access mode
    pub fn get_with<T: DeserializeOwned>(
        &self,
        key: &str,
        access: AccessRequest,
    ) -> Result<ReadResult<T>> {
        validate_key(key)?;
        access.validate(Operation::Read)?;
        let access = self.with_default_lock_timeout(access);

        let result = self.engine().and_then(|engine| {
            let response = engine.get(GetRequest {
                key: key.to_string(),
                access,
            })?;
            match response.outcome {
                ReadOutcome::Found(item) => Ok(ReadResult::Found {
                    value: self.decode_item(&item)?,
                    version: item.metadata.version,
                    lock_handle: response.lock_handle,
                }),
                ReadOutcome::NotFound => Ok(ReadResult::NotFound),
                ReadOutcome::Locked => Ok(ReadResult::Locked),
                ReadOutcome::Unchanged(version) => Ok(ReadResult::Unchanged(version)),
            }
        });
        self.settle("get", Some(key), result, || ReadResult::NotFound)
    }

    /// Read and lock in one call
    pub fn get_with_lock<T: DeserializeOwned>(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<(T, LockHandle)>> {
        match self.get_with(key, AccessRequest::acquire(timeout))? {
            ReadResult::Found {
                value,
                lock_handle: Some(handle),
                ..
            } => Ok(Some((value, handle))),
            _ => Ok(None),
        }
    }

    /// Read only when the key is not locked
    pub fn get_if_unlocked<T: DeserializeOwned>(&self, key: &str) -> Result<ReadResult<T>> {
        self.get_with(key, AccessRequest::dont_acquire())
    }

    /// Read the value together with its current version
    pub fn get_with_version<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(T, ItemVersion)>> {
        match self.get_with(key, AccessRequest::get_version())? {
            ReadResult::Found { value, version, .. } => Ok(Some((value, version))),
            _ => Ok(None),
        }
    }

    /// Read only when the stored version differs from `version`
    pub fn get_if_newer<T: DeserializeOwned>(
        &self,
        key: &str,
        version: ItemVersion,
    ) -> Result<ReadResult<T>> {
        self.get_with(key, AccessRequest::match_version(version))
    }

    /// Read several keys; missing keys are left out of the result
    pub fn get_bulk<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<HashMap<String, T>> {
        let unique = unique_keys(keys)?;
        let result = self.engine().and_then(|engine| {
            engine
                .get_bulk(&unique)?
                .into_iter()
                .map(|(key, item)| Ok((key, self.decode_item(&item)?)))
                .collect::<Result<HashMap<String, T>>>()
        });
        self.settle("get_bulk", None, result, HashMap::new)
    }

    /// Value plus engine metadata
    pub fn get_cache_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheItem<T>>> {
        validate_key(key)?;
        let result = self.engine().and_then(|engine| {
            let response = engine.get(GetRequest {
                key: key.to_string(),
                access: AccessRequest::default(),
            })?;
            match response.outcome {
                ReadOutcome::Found(item) => {
                    let value = self.decode_item(&item)?;
                    let metadata = item.metadata;
                    Ok(Some(CacheItem {
                        key: key.to_string(),
                        value,
                        version: metadata.version,
                        created_at: metadata.created_at,
                        last_modified: metadata.last_modified,
                        expiration: metadata.expiration,
                        priority: metadata.priority,
                        group: metadata.group,
                        sub_group: metadata.sub_group,
                        flags: item.value.flags,
                    }))
                }
                _ => Ok(None),
            }
        });
        self.settle("get_cache_item", Some(key), result, || None)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let result = self.engine().and_then(|engine| engine.contains(key));
        self.settle("contains", Some(key), result, || false)
    }

    pub fn count(&self) -> Result<u64> {
        let result = self.engine().and_then(|engine| engine.count());
        self.settle("count", None, result, || 0)
    }

    // Writes

    /// Plain write; returns the new version
    pub fn insert<T: Serialize>(&self, key: &str, value: &T) -> Result<ItemVersion> {
        self.insert_with(key, value, InsertOptions::default())
    }

    pub fn insert_with<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: InsertOptions,
    ) -> Result<ItemVersion> {
        self.write("insert", key, value, options, false)
    }

    /// Write only when the key is absent
    pub fn add<T: Serialize>(&self, key: &str, value: &T) -> Result<ItemVersion> {
        self.add_with(key, value, InsertOptions::default())
    }

    pub fn add_with<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: InsertOptions,
    ) -> Result<ItemVersion> {
        self.write("add", key, value, options, true)
    }

    fn write<T: Serialize>(
        &self,
        operation: &str,
        key: &str,
        value: &T,
        options: InsertOptions,
        only_if_absent: bool,
    ) -> Result<ItemVersion> {
        let request = self.prepare_insert(key, value, &options, only_if_absent)?;
        let engine = self.engine()?;

        let result = self.register_write_callbacks(request, &options).and_then(|request| {
            engine.insert(request).map(|response| response.version).map_err(|error| {
                self.multiplexer.release_write_callbacks(
                    key,
                    options.update_callback.as_ref(),
                    options.remove_callback.as_ref(),
                );
                error
            })
        });

        if result.is_ok() {
            log_cache_operation(operation, self.cache_id(), Some(key), "stored", None);
        }
        self.settle(operation, Some(key), result, || ItemVersion::NONE)
    }

    /// Validate and encode a write without contacting the engine
    fn prepare_insert<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: &InsertOptions,
        only_if_absent: bool,
    ) -> Result<InsertRequest> {
        validate_key(key)?;
        options.expiration.validate()?;
        options.access.validate(Operation::Write)?;

        let mut encoded: EncodedValue = encode(self.serializer.as_ref(), value)?;
        encoded.flags.set(options.flags);
        if options
            .access
            .lock_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_empty())
        {
            encoded.flags.set(ValueFlags::LOCKED_ITEM);
        }

        Ok(InsertRequest {
            key: key.to_string(),
            value: encoded,
            expiration: options.expiration,
            priority: options.priority,
            group: options.group.clone(),
            sub_group: options.sub_group.clone(),
            access: options.access.clone(),
            update_callback: None,
            remove_callback: None,
            only_if_absent,
        })
    }

    fn register_write_callbacks(
        &self,
        mut request: InsertRequest,
        options: &InsertOptions,
    ) -> Result<InsertRequest> {
        let (update_callback, remove_callback) = self.multiplexer.register_write_callbacks(
            &request.key,
            options.update_callback.as_ref(),
            options.remove_callback.as_ref(),
        )?;
        request.update_callback = update_callback;
        request.remove_callback = remove_callback;
        Ok(request)
    }

    /// Write every item with the same options.
    ///
    /// Returns the keys that could not be written, each with its error; an
    /// empty map means every item was stored. A key listed twice is written
    /// once, with its last value.
    pub fn insert_bulk<T: Serialize>(
        &self,
        items: &[(&str, T)],
        options: InsertOptions,
    ) -> Result<HashMap<String, CacheError>> {
        self.write_bulk("insert_bulk", items, &options, false)
    }

    /// [`insert_bulk`](Self::insert_bulk) that skips keys already present;
    /// those are reported as [`CacheError::KeyExists`]
    pub fn add_bulk<T: Serialize>(
        &self,
        items: &[(&str, T)],
        options: InsertOptions,
    ) -> Result<HashMap<String, CacheError>> {
        self.write_bulk("add_bulk", items, &options, true)
    }

    fn write_bulk<T: Serialize>(
        &self,
        operation: &str,
        items: &[(&str, T)],
        options: &InsertOptions,
        only_if_absent: bool,
    ) -> Result<HashMap<String, CacheError>> {
        if items.is_empty() {
            return Err(CacheError::invalid_argument("item list cannot be empty"));
        }
        let access = &options.access;
        if access.mode != AccessMode::Default
            || access.lock_handle.is_some()
            || access.version.is_some()
        {
            return Err(CacheError::invalid_argument(
                "bulk writes do not take lock or version arguments",
            ));
        }

        let mut order = Vec::with_capacity(items.len());
        let mut latest: HashMap<&str, &T> = HashMap::with_capacity(items.len());
        for (key, value) in items {
            validate_key(key)?;
            if latest.insert(*key, value).is_none() {
                order.push(*key);
            }
        }
        // Every value is encoded before the first engine call
        let requests = order
            .iter()
            .map(|key| self.prepare_insert(key, latest[key], options, only_if_absent))
            .collect::<Result<Vec<_>>>()?;
        let engine = self.engine()?;

        let mut failed = HashMap::new();
        for request in requests {
            let key = request.key.clone();
            let stored = self
                .register_write_callbacks(request, options)
                .and_then(|request| {
                    engine.insert(request).map_err(|error| {
                        self.multiplexer.release_write_callbacks(
                            &key,
                            options.update_callback.as_ref(),
                            options.remove_callback.as_ref(),
                        );
                        error
                    })
                });
            if let Err(error) = stored {
                debug!(operation = %operation, key = %key, error = %error, "Bulk write failed for key");
                failed.insert(key, error);
            }
        }

        log_cache_operation(
            operation,
            self.cache_id(),
            None,
            "stored",
            Some(&format!("{} of {} items", order.len() - failed.len(), order.len())),
        );
        Ok(failed)
    }

    /// Remove a key and return the value it held
    pub fn remove<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.remove_with(key, AccessRequest::default())
    }

    pub fn remove_with<T: DeserializeOwned>(
        &self,
        key: &str,
        access: AccessRequest,
    ) -> Result<Option<T>> {
        validate_key(key)?;
        access.validate(Operation::Remove)?;

        let result = self.engine().and_then(|engine| {
            engine
                .remove(RemoveRequest {
                    key: key.to_string(),
                    access,
                })?
                .map(|item| self.decode_item(&item))
                .transpose()
        });
        self.settle("remove", Some(key), result, || None)
    }

    /// Remove a key without transferring its value
    pub fn delete(&self, key: &str) -> Result<()> {
        self.delete_with(key, AccessRequest::default())
    }

    pub fn delete_with(&self, key: &str, access: AccessRequest) -> Result<()> {
        validate_key(key)?;
        access.validate(Operation::Remove)?;

        let result = self.engine().and_then(|engine| {
            engine
                .remove(RemoveRequest {
                    key: key.to_string(),
                    access,
                })
                .map(|_| ())
        });
        self.settle("delete", Some(key), result, || ())
    }

    /// Remove several keys, returning the values of those that existed
    pub fn remove_bulk<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<HashMap<String, T>> {
        let unique = unique_keys(keys)?;
        let result = self.engine().and_then(|engine| {
            let mut removed = HashMap::with_capacity(unique.len());
            for key in unique {
                let item = engine.remove(RemoveRequest {
                    key: key.clone(),
                    access: AccessRequest::default(),
                })?;
                if let Some(item) = item {
                    let value = self.decode_item(&item)?;
                    removed.insert(key, value);
                }
            }
            Ok(removed)
        });
        self.settle("remove_bulk", None, result, HashMap::new)
    }

    /// Remove several keys without transferring their values
    pub fn delete_bulk(&self, keys: &[&str]) -> Result<()> {
        let unique = unique_keys(keys)?;
        let result = self.engine().and_then(|engine| {
            for key in unique {
                engine.remove(RemoveRequest {
                    key,
                    access: AccessRequest::default(),
                })?;
            }
            Ok(())
        });
        self.settle("delete_bulk", None, result, || ())
    }

    /// Remove every item and every per-key registration
    pub fn clear(&self) -> Result<()> {
        let result = self.engine().and_then(|engine| engine.clear());
        if result.is_ok() {
            let released = self.multiplexer.clear_selective();
            log_cache_operation(
                "clear",
                self.cache_id(),
                None,
                "cleared",
                Some(&format!("released {released} key callbacks")),
            );
        }
        self.settle("clear", None, result, || ())
    }

    // Locking

    /// Lock a key; `None` when the key does not exist
    pub fn lock(&self, key: &str, timeout: Duration) -> Result<Option<LockHandle>> {
        validate_key(key)?;
        let result = self.engine().and_then(|engine| engine.lock(key, timeout));
        self.settle("lock", Some(key), result, || None)
    }

    /// Release a lock; without a handle the lock is released unconditionally
    pub fn unlock(&self, key: &str, handle: Option<&LockHandle>) -> Result<()> {
        validate_key(key)?;
        let result = self.engine().and_then(|engine| engine.unlock(key, handle));
        self.settle("unlock", Some(key), result, || ())
    }

    /// Whether `key` is locked by a holder other than `handle`
    ///
    /// Without a handle any active lock counts. A missing key is not locked.
    pub fn is_locked(&self, key: &str, handle: Option<&LockHandle>) -> Result<bool> {
        validate_key(key)?;
        let result = self.engine().and_then(|engine| engine.lock_status(key)).map(|current| {
            current.is_some_and(|current| {
                !matches!(handle, Some(handle) if handle.lock_id() == current.lock_id())
            })
        });
        self.settle("is_locked", Some(key), result, || false)
    }

    /// Handle of the lock currently held on `key`, if any
    pub fn lock_holder(&self, key: &str) -> Result<Option<LockHandle>> {
        validate_key(key)?;
        let result = self.engine().and_then(|engine| engine.lock_status(key));
        self.settle("lock_holder", Some(key), result, || None)
    }

    fn with_default_lock_timeout(&self, mut access: AccessRequest) -> AccessRequest {
        if access.mode == AccessMode::Acquire && access.lock_timeout.is_none() {
            access.lock_timeout = Some(self.config.default_lock_timeout());
        }
        access
    }

    // Enumeration

    /// Lazy traversal of the whole cache
    pub fn enumerate<T: DeserializeOwned>(&self) -> Result<CacheEnumerator<T>> {
        self.enumerate_scope(EnumerationScope::All)
    }

    /// Lazy traversal of the items written with `group`
    pub fn enumerate_group<T: DeserializeOwned>(
        &self,
        group: &str,
        sub_group: Option<&str>,
    ) -> Result<CacheEnumerator<T>> {
        if group.is_empty() {
            return Err(CacheError::invalid_argument("group cannot be empty"));
        }
        self.enumerate_scope(EnumerationScope::Group {
            group: group.to_string(),
            sub_group: sub_group.map(str::to_string),
        })
    }

    pub fn enumerate_scope<T: DeserializeOwned>(
        &self,
        scope: EnumerationScope,
    ) -> Result<CacheEnumerator<T>> {
        let engine = self.engine()?;
        let cursor = EnumerationCursor::begin(engine, scope, self.config.enumeration.chunk_size)?;
        Ok(CacheEnumerator::new(
            cursor,
            Arc::clone(&self.serializer),
            self.exceptions_enabled(),
        ))
    }

    // Events

    /// Subscribe `handler` to updates and/or removals of `key`
    pub fn register_key_callback(
        &self,
        key: &str,
        handler: &EventCallback,
        event_mask: EventMask,
        filter: EventDataFilter,
    ) -> Result<SelectiveTokens> {
        self.engine()?;
        let result = self
            .multiplexer
            .register_selective(key, handler, event_mask, filter);
        self.settle("register_key_callback", Some(key), result, SelectiveTokens::default)
    }

    /// [`register_key_callback`](Self::register_key_callback) for several
    /// keys, all or nothing.
    ///
    /// Tokens belong to the handler and event category rather than to a key,
    /// so the returned pair is the one every key shares. When a key fails,
    /// the keys registered before it are unregistered again.
    pub fn register_keys_callback(
        &self,
        keys: &[&str],
        handler: &EventCallback,
        event_mask: EventMask,
        filter: EventDataFilter,
    ) -> Result<SelectiveTokens> {
        if keys.is_empty() {
            return Err(CacheError::invalid_argument("key list cannot be empty"));
        }
        for key in keys {
            validate_key(key)?;
        }
        self.engine()?;

        let mut tokens = SelectiveTokens::default();
        let mut registered = Vec::with_capacity(keys.len());
        let mut failure = None;
        for key in keys {
            match self
                .multiplexer
                .register_selective(key, handler, event_mask, filter)
            {
                Ok(key_tokens) => {
                    tokens = key_tokens;
                    registered.push(key.to_string());
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        let result = match failure {
            None => Ok(tokens),
            Some(error) => {
                if let Err(rollback) = self
                    .multiplexer
                    .unregister_selective_keys(&registered, handler, event_mask)
                {
                    log_error(
                        "session",
                        "register_keys_callback",
                        &rollback.to_string(),
                        None,
                    );
                }
                Err(error)
            }
        };
        self.settle("register_keys_callback", None, result, SelectiveTokens::default)
    }

    pub fn unregister_key_callback(
        &self,
        key: &str,
        handler: &EventCallback,
        event_mask: EventMask,
    ) -> Result<()> {
        validate_key(key)?;
        self.engine()?;
        let result = self
            .multiplexer
            .unregister_selective(key, handler, event_mask);
        self.settle("unregister_key_callback", Some(key), result, || ())
    }

    pub fn unregister_keys_callback(
        &self,
        keys: &[&str],
        handler: &EventCallback,
        event_mask: EventMask,
    ) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        for key in &keys {
            validate_key(key)?;
        }
        self.engine()?;
        let result = self
            .multiplexer
            .unregister_selective_keys(&keys, handler, event_mask);
        self.settle("unregister_keys_callback", None, result, || ())
    }

    /// Subscribe `handler` to cache-wide events
    pub fn register_cache_event(
        &self,
        handler: &EventCallback,
        event_mask: EventMask,
        filter: EventDataFilter,
    ) -> Result<CacheEventDescriptor> {
        self.engine()?;
        self.multiplexer.register_general(handler, event_mask, filter)
    }

    /// Drop a cache-wide subscription; unknown descriptors are ignored
    pub fn unregister_cache_event(&self, descriptor: &CacheEventDescriptor) -> Result<()> {
        self.engine()?;
        let result = self.multiplexer.unregister(descriptor);
        self.settle("unregister_cache_event", None, result, || ())
    }

    // Async variants

    pub fn insert_async<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: InsertOptions,
        callback: Option<&AsyncCallback>,
    ) -> Result<()> {
        self.write_async(AsyncOperation::Insert, key, value, options, callback)
    }

    pub fn add_async<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: InsertOptions,
        callback: Option<&AsyncCallback>,
    ) -> Result<()> {
        self.write_async(AsyncOperation::Add, key, value, options, callback)
    }

    fn write_async<T: Serialize>(
        &self,
        operation: AsyncOperation,
        key: &str,
        value: &T,
        options: InsertOptions,
        callback: Option<&AsyncCallback>,
    ) -> Result<()> {
        let request =
            self.prepare_insert(key, value, &options, operation == AsyncOperation::Add)?;
        let engine = self.engine()?;
        let request = self.register_write_callbacks(request, &options)?;

        let multiplexer = Arc::clone(&self.multiplexer);
        let owned_key = key.to_string();
        let work = Box::new(move || {
            engine
                .insert(request)
                .map(|response| response.version)
                .map_err(|error| {
                    multiplexer.release_write_callbacks(
                        &owned_key,
                        options.update_callback.as_ref(),
                        options.remove_callback.as_ref(),
                    );
                    error
                })
        });
        self.async_ops
            .submit(operation, Some(key.to_string()), callback, work)
    }

    pub fn remove_async(&self, key: &str, callback: Option<&AsyncCallback>) -> Result<()> {
        validate_key(key)?;
        let engine = self.engine()?;
        let request = RemoveRequest {
            key: key.to_string(),
            access: AccessRequest::default(),
        };
        let work = Box::new(move || engine.remove(request).map(|_| ItemVersion::NONE));
        self.async_ops
            .submit(AsyncOperation::Remove, Some(key.to_string()), callback, work)
    }

    pub fn clear_async(&self, callback: Option<&AsyncCallback>) -> Result<()> {
        let engine = self.engine()?;
        let multiplexer = Arc::clone(&self.multiplexer);
        let work = Box::new(move || {
            engine.clear()?;
            multiplexer.clear_selective();
            Ok(ItemVersion::NONE)
        });
        self.async_ops
            .submit(AsyncOperation::Clear, None, callback, work)
    }

    /// Block until queued async operations finished, up to the request timeout
    pub fn wait_for_async(&self) -> Result<()> {
        self.async_ops.wait_idle(self.config.request_timeout())
    }

    pub fn pending_async(&self) -> usize {
        self.async_ops.pending()
    }

    // Diagnostics

    pub fn registry_stats(&self) -> RegistryStats {
        self.event_registry.stats()
    }

    pub fn async_registry_stats(&self) -> RegistryStats {
        self.async_ops.registry().stats()
    }

    pub fn multiplexer_stats(&self) -> MultiplexerStats {
        self.multiplexer.stats()
    }

    /// Release every session resource and detach from the engine.
    ///
    /// Live enumerators release their own pointers when dropped. Calls made
    /// after disposal fail with [`CacheError::NotInitialized`].
    pub fn dispose(&self) -> Result<()> {
        let Some(engine) = self.engine.write().take() else {
            return Ok(());
        };

        if let Err(error) = self.async_ops.wait_idle(self.config.request_timeout()) {
            warn!(error = %error, "Async operations still pending at dispose");
        }
        self.async_ops.shutdown();

        self.multiplexer.clear_all();
        self.event_registry.clear(ClearScope::All);
        self.async_ops.registry().clear(ClearScope::All);

        let result = engine.dispose_session();
        if let Err(error) = &result {
            log_error("session", "dispose", &error.to_string(), Some(self.cache_id()));
        }
        info!(cache_id = %self.cache_id(), "Cache session disposed");
        result
    }
}

impl Drop for CacheSession {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

impl std::fmt::Debug for CacheSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSession")
            .field("cache_id", &self.config.cache_id)
            .field("disposed", &self.is_disposed())
            .field("exceptions_enabled", &self.exceptions_enabled())
            .finish()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::invalid_argument("key cannot be empty"));
    }
    Ok(())
}

/// Validated keys in first-seen order, duplicates dropped
fn unique_keys(keys: &[&str]) -> Result<Vec<String>> {
    if keys.is_empty() {
        return Err(CacheError::invalid_argument("key list cannot be empty"));
    }
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(keys.len());
    for key in keys {
        validate_key(key)?;
        if seen.insert(*key) {
            unique.push(key.to_string());
        }
    }
    Ok(unique)
}

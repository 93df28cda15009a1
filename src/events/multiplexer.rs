//! # Event Multiplexer
//!
//! Binds [`EventCallback`] handlers to event kinds and payload filters, for
//! single keys (selective) and for the whole cache (general).
//!
//! ## Overview
//!
//! Handlers never cross the wire. Registration turns a handler into one token
//! per relevant [`CallbackCategory`] through the shared [`TokenRegistry`] and
//! hands the tokens to the engine. When the engine later delivers a
//! notification, the multiplexer resolves the token back to the handler and
//! invokes it on the delivering thread.
//!
//! ## Category mapping
//!
//! | Event kind | Category |
//! |------------|----------|
//! | item added | `ItemAdded` |
//! | item updated | `ItemUpdated` |
//! | item removed | `ItemRemoved` |
//! | custom | `CustomEvent` |
//! | cache cleared / stopped / connectivity | `GeneralEvent` |
//!
//! Selective registrations only support the updated and removed kinds.

use super::descriptor::{CacheEventDescriptor, GeneralRegistration, ItemCallback, SelectiveTokens};
use super::types::{
    CacheEvent, EventCacheItem, EventCallback, EventDataFilter, EventMask, EventType,
};
use crate::engine::{
    EngineNotification, EngineSubscriptionId, KeyCallback, KeyNotification, NotificationListener,
    NotificationTarget, RemoteEngine, StoredItem,
};
use crate::error::{CacheError, Result};
use crate::logging::{log_error, log_registry_operation};
use crate::registry::{CallbackCategory, CallbackToken, HandlerId, RegistryHandler, TokenRegistry};
use crate::serialization::Serializer;
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Category a cache-wide registration for `event_type` lives in
pub fn general_category(event_type: EventType) -> CallbackCategory {
    match event_type {
        EventType::ItemAdded => CallbackCategory::ItemAdded,
        EventType::ItemUpdated => CallbackCategory::ItemUpdated,
        EventType::ItemRemoved => CallbackCategory::ItemRemoved,
        EventType::Custom => CallbackCategory::CustomEvent,
        EventType::CacheCleared | EventType::CacheStopped | EventType::ConnectivityChanged => {
            CallbackCategory::GeneralEvent
        }
    }
}

#[derive(Debug, Clone)]
struct SelectiveRegistration {
    handler: EventCallback,
    tokens: SelectiveTokens,
}

#[derive(Debug, Clone, Copy)]
struct GeneralRoute {
    category: CallbackCategory,
    token: CallbackToken,
    filter: EventDataFilter,
}

/// Snapshot of the multiplexer's routing state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    pub selective_keys: usize,
    pub selective_registrations: usize,
    pub general_descriptors: usize,
    pub general_routes: usize,
}

/// Routes engine notifications to application handlers
pub struct EventMultiplexer {
    cache_id: String,
    registry: Arc<TokenRegistry<EventCallback>>,
    engine: Arc<dyn RemoteEngine>,
    serializer: Arc<dyn Serializer>,
    key_index: DashMap<String, Vec<SelectiveRegistration>>,
    routes: DashMap<EngineSubscriptionId, GeneralRoute>,
    descriptors: DashMap<Uuid, CacheEventDescriptor>,
}

impl EventMultiplexer {
    pub fn new(
        cache_id: impl Into<String>,
        registry: Arc<TokenRegistry<EventCallback>>,
        engine: Arc<dyn RemoteEngine>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            cache_id: cache_id.into(),
            registry,
            engine,
            serializer,
            key_index: DashMap::new(),
            routes: DashMap::new(),
            descriptors: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TokenRegistry<EventCallback>> {
        &self.registry
    }

    /// Listener to attach to the engine.
    ///
    /// Holds the multiplexer weakly so the engine never keeps it alive.
    pub fn listener(self: &Arc<Self>) -> Arc<dyn NotificationListener> {
        Arc::new(DispatchListener(Arc::downgrade(self)))
    }

    /// Register `handler` for updates and/or removals of `key`
    pub fn register_selective(
        &self,
        key: &str,
        handler: &EventCallback,
        event_mask: EventMask,
        filter: EventDataFilter,
    ) -> Result<SelectiveTokens> {
        if key.is_empty() {
            return Err(CacheError::invalid_argument("key cannot be empty"));
        }
        if event_mask.contains(EventType::ItemAdded) {
            return Err(CacheError::invalid_argument(
                "item added events are not supported for a single key",
            ));
        }
        let wants_update = event_mask.contains(EventType::ItemUpdated);
        let wants_remove = event_mask.contains(EventType::ItemRemoved);
        if !wants_update && !wants_remove {
            return Err(CacheError::invalid_argument(
                "a key registration needs item updated or item removed events",
            ));
        }

        let tokens = self.acquire_tokens(
            wants_update.then_some(handler),
            wants_remove.then_some(handler),
        )?;

        let notification = KeyNotification {
            update_token: tokens.update_token,
            remove_token: tokens.remove_token,
            filter,
        };
        if let Err(error) = self.engine.register_key_notification(key, notification) {
            self.release_tokens(tokens, Some(handler), Some(handler));
            return Err(error);
        }

        self.key_index
            .entry(key.to_string())
            .or_default()
            .push(SelectiveRegistration {
                handler: handler.clone(),
                tokens,
            });

        log_registry_operation(
            "register_selective",
            "item-updated/item-removed",
            tokens.update_token.or(tokens.remove_token).map(CallbackToken::value),
            "registered",
            Some(key),
        );
        Ok(tokens)
    }

    /// Obtain tokens for callbacks that travel with a write.
    ///
    /// The engine learns the tokens from the write itself, so only the local
    /// bookkeeping happens here.
    pub fn register_write_callbacks(
        &self,
        key: &str,
        update: Option<&ItemCallback>,
        remove: Option<&ItemCallback>,
    ) -> Result<(Option<KeyCallback>, Option<KeyCallback>)> {
        if update.is_none() && remove.is_none() {
            return Ok((None, None));
        }

        let tokens = self.acquire_tokens(
            update.map(|callback| &callback.handler),
            remove.map(|callback| &callback.handler),
        )?;

        if let Some(callback) = update {
            self.record_selective(key, &callback.handler, tokens.update_token, None);
        }
        if let Some(callback) = remove {
            self.record_selective(key, &callback.handler, None, tokens.remove_token);
        }

        let update_callback = update.zip(tokens.update_token).map(|(callback, token)| KeyCallback {
            token,
            filter: callback.filter,
        });
        let remove_callback = remove.zip(tokens.remove_token).map(|(callback, token)| KeyCallback {
            token,
            filter: callback.filter,
        });
        Ok((update_callback, remove_callback))
    }

    /// Undo [`register_write_callbacks`](Self::register_write_callbacks) after a failed write
    pub fn release_write_callbacks(
        &self,
        key: &str,
        update: Option<&ItemCallback>,
        remove: Option<&ItemCallback>,
    ) {
        if let Some(callback) = update {
            self.forget_selective(key, callback.handler.handler_id(), true, false);
        }
        if let Some(callback) = remove {
            self.forget_selective(key, callback.handler.handler_id(), false, true);
        }
    }

    /// Stop delivering `event_mask` events for `key` to `handler`
    pub fn unregister_selective(
        &self,
        key: &str,
        handler: &EventCallback,
        event_mask: EventMask,
    ) -> Result<()> {
        let update = event_mask.contains(EventType::ItemUpdated);
        let remove = event_mask.contains(EventType::ItemRemoved);
        let handler_id = handler.handler_id();

        let Some(tokens) = self.selective_tokens(key, handler_id) else {
            debug!(key = %key, "No selective registration for handler, nothing to unregister");
            return Ok(());
        };
        let to_drop = SelectiveTokens {
            update_token: tokens.update_token.filter(|_| update),
            remove_token: tokens.remove_token.filter(|_| remove),
        };
        if to_drop.is_empty() {
            return Ok(());
        }

        self.engine.unregister_key_notification(
            key,
            KeyNotification {
                update_token: to_drop.update_token,
                remove_token: to_drop.remove_token,
                filter: EventDataFilter::None,
            },
        )?;
        self.forget_selective(key, handler_id, update, remove);

        log_registry_operation(
            "unregister_selective",
            "item-updated/item-removed",
            to_drop.update_token.or(to_drop.remove_token).map(CallbackToken::value),
            "unregistered",
            Some(key),
        );
        Ok(())
    }

    /// [`unregister_selective`](Self::unregister_selective) for several keys
    pub fn unregister_selective_keys(
        &self,
        keys: &[String],
        handler: &EventCallback,
        event_mask: EventMask,
    ) -> Result<()> {
        for key in keys {
            self.unregister_selective(key, handler, event_mask)?;
        }
        Ok(())
    }

    /// Register `handler` for cache-wide events
    pub fn register_general(
        &self,
        handler: &EventCallback,
        event_mask: EventMask,
        filter: EventDataFilter,
    ) -> Result<CacheEventDescriptor> {
        if event_mask.is_empty() {
            return Err(CacheError::invalid_argument(
                "a cache-wide registration needs at least one event type",
            ));
        }

        let mut registrations: Vec<GeneralRegistration> = Vec::new();
        for event_type in event_mask.event_types() {
            let category = general_category(event_type);
            let registered = self.registry.register(category, handler).and_then(|token| {
                match self.engine.register_general_notification(event_type, filter) {
                    Ok(subscription) => Ok((token, subscription)),
                    Err(error) => {
                        self.registry.unregister(category, handler);
                        Err(error)
                    }
                }
            });

            match registered {
                Ok((token, subscription)) => {
                    self.routes.insert(
                        subscription,
                        GeneralRoute {
                            category,
                            token,
                            filter,
                        },
                    );
                    registrations.push(GeneralRegistration {
                        event_type,
                        category,
                        token,
                        subscription,
                    });
                }
                Err(error) => {
                    let _ = self.drop_general(handler, &registrations);
                    return Err(error);
                }
            }
        }

        let descriptor = CacheEventDescriptor::new(handler.clone(), event_mask, filter, registrations);
        self.descriptors.insert(descriptor.id(), descriptor.clone());
        log_registry_operation(
            "register_general",
            "general",
            None,
            "registered",
            Some(&descriptor.id().to_string()),
        );
        Ok(descriptor)
    }

    /// Stop a cache-wide registration; unknown descriptors are ignored
    pub fn unregister(&self, descriptor: &CacheEventDescriptor) -> Result<()> {
        let Some((_, stored)) = self.descriptors.remove(&descriptor.id()) else {
            debug!(descriptor_id = %descriptor.id(), "Descriptor not registered, nothing to unregister");
            return Ok(());
        };

        let result = self.drop_general(&stored.handler, &stored.registrations);
        log_registry_operation(
            "unregister_general",
            "general",
            None,
            if result.is_ok() { "unregistered" } else { "partial" },
            Some(&stored.id().to_string()),
        );
        result
    }

    /// Release every selective registration locally.
    ///
    /// Used after the cache was cleared: the engine already dropped the
    /// per-key associations together with the items.
    pub fn clear_selective(&self) -> usize {
        let keys: Vec<String> = self.key_index.iter().map(|entry| entry.key().clone()).collect();
        let mut released = 0;
        for key in keys {
            released += self.forget_key(&key);
        }
        if released > 0 {
            debug!(released = released, "Released selective registrations");
        }
        released
    }

    /// Forget every registration without contacting the engine
    pub fn clear_all(&self) {
        self.key_index.clear();
        self.routes.clear();
        self.descriptors.clear();
    }

    pub fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            selective_keys: self.key_index.len(),
            selective_registrations: self.key_index.iter().map(|entry| entry.value().len()).sum(),
            general_descriptors: self.descriptors.len(),
            general_routes: self.routes.len(),
        }
    }

    /// Resolve and invoke the handler a notification is addressed to
    pub fn dispatch(&self, notification: EngineNotification) {
        let resolved = match notification.target {
            NotificationTarget::Token { category, token } => self
                .registry
                .resolve(category, token)
                .map(|handler| (handler, notification.filter)),
            NotificationTarget::Subscription(subscription) => {
                let route = self.routes.get(&subscription).map(|route| *route);
                route.and_then(|route| {
                    self.registry
                        .resolve(route.category, route.token)
                        .map(|handler| (handler, notification.filter.min(route.filter)))
                })
            }
        };

        let Some((handler, filter)) = resolved else {
            debug!(
                event_type = %notification.event_type,
                target = ?notification.target,
                "Dropping notification for unknown callback"
            );
            return;
        };

        let event = self.build_event(&notification, filter);
        if panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(&event))).is_err() {
            log_error(
                "event_multiplexer",
                "dispatch",
                "event handler panicked",
                notification.key.as_deref(),
            );
        }

        if notification.event_type == EventType::ItemRemoved {
            if let (NotificationTarget::Token { .. }, Some(key)) =
                (notification.target, notification.key.as_deref())
            {
                self.forget_removed_registration(key, handler.handler_id());
            }
        }
    }

    /// Release every local registration on `key` after the engine dropped them
    ///
    /// The engine reports this once an item leaves the cache, so update-only
    /// registrations that never receive a removal notification are freed too.
    pub fn key_registrations_dropped(&self, key: &str) -> usize {
        let released = self.forget_key(key);
        if released > 0 {
            log_registry_operation("forget_key", "selective", None, "released", Some(key));
        }
        released
    }

    fn build_event(&self, notification: &EngineNotification, filter: EventDataFilter) -> CacheEvent {
        let payload = &notification.payload;
        CacheEvent {
            cache_id: self.cache_id.clone(),
            event_type: notification.event_type,
            key: notification.key.clone(),
            filter,
            item: payload
                .item
                .as_ref()
                .and_then(|item| self.event_item(item, filter)),
            old_item: payload
                .old_item
                .as_ref()
                .and_then(|item| self.event_item(item, filter)),
            reason: payload.reason,
            custom_data: payload.custom_data.clone(),
        }
    }

    /// Shape an engine item according to `filter`
    fn event_item(&self, item: &StoredItem, filter: EventDataFilter) -> Option<EventCacheItem> {
        if filter == EventDataFilter::None {
            return None;
        }
        let value = if filter == EventDataFilter::MetadataAndData {
            match self.serializer.deserialize(&item.value) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(error = %error, "Could not deserialize event payload");
                    None
                }
            }
        } else {
            None
        };

        let metadata = &item.metadata;
        Some(EventCacheItem {
            version: metadata.version,
            created_at: metadata.created_at,
            last_modified: metadata.last_modified,
            expiration: metadata.expiration,
            priority: metadata.priority,
            group: metadata.group.clone(),
            value,
        })
    }

    /// Register `update` and `remove` in their categories, all or nothing
    fn acquire_tokens(
        &self,
        update: Option<&EventCallback>,
        remove: Option<&EventCallback>,
    ) -> Result<SelectiveTokens> {
        let update_token = update
            .map(|handler| self.registry.register(CallbackCategory::ItemUpdated, handler))
            .transpose()?;

        let remove_token = match remove
            .map(|handler| self.registry.register(CallbackCategory::ItemRemoved, handler))
            .transpose()
        {
            Ok(token) => token,
            Err(error) => {
                if let Some(handler) = update {
                    self.registry.unregister(CallbackCategory::ItemUpdated, handler);
                }
                return Err(error);
            }
        };

        Ok(SelectiveTokens {
            update_token,
            remove_token,
        })
    }

    fn release_tokens(
        &self,
        tokens: SelectiveTokens,
        update: Option<&EventCallback>,
        remove: Option<&EventCallback>,
    ) {
        if let (Some(_), Some(handler)) = (tokens.update_token, update) {
            self.registry.unregister(CallbackCategory::ItemUpdated, handler);
        }
        if let (Some(_), Some(handler)) = (tokens.remove_token, remove) {
            self.registry.unregister(CallbackCategory::ItemRemoved, handler);
        }
    }

    fn record_selective(
        &self,
        key: &str,
        handler: &EventCallback,
        update_token: Option<CallbackToken>,
        remove_token: Option<CallbackToken>,
    ) {
        self.key_index
            .entry(key.to_string())
            .or_default()
            .push(SelectiveRegistration {
                handler: handler.clone(),
                tokens: SelectiveTokens {
                    update_token,
                    remove_token,
                },
            });
    }

    /// Union of the tokens `handler_id` holds on `key`
    fn selective_tokens(&self, key: &str, handler_id: HandlerId) -> Option<SelectiveTokens> {
        let registrations = self.key_index.get(key)?;
        let mut tokens = SelectiveTokens::default();
        let mut found = false;
        for registration in registrations
            .iter()
            .filter(|registration| registration.handler.handler_id() == handler_id)
        {
            found = true;
            tokens.update_token = tokens.update_token.or(registration.tokens.update_token);
            tokens.remove_token = tokens.remove_token.or(registration.tokens.remove_token);
        }
        found.then_some(tokens)
    }

    /// Drop the update and/or remove side of `handler_id`'s registrations on `key`
    fn forget_selective(&self, key: &str, handler_id: HandlerId, update: bool, remove: bool) {
        let mut released: Vec<(CallbackCategory, EventCallback)> = Vec::new();

        if let Some(mut registrations) = self.key_index.get_mut(key) {
            for registration in registrations
                .iter_mut()
                .filter(|registration| registration.handler.handler_id() == handler_id)
            {
                if update && registration.tokens.update_token.take().is_some() {
                    released.push((CallbackCategory::ItemUpdated, registration.handler.clone()));
                }
                if remove && registration.tokens.remove_token.take().is_some() {
                    released.push((CallbackCategory::ItemRemoved, registration.handler.clone()));
                }
            }
            registrations.retain(|registration| !registration.tokens.is_empty());
        }
        self.key_index
            .remove_if(key, |_, registrations| registrations.is_empty());

        for (category, handler) in released {
            self.registry.unregister(category, &handler);
        }
    }

    /// Release the one registration whose removal notification was delivered
    ///
    /// The engine drops that registration with both of its tokens. Other
    /// handlers on the key keep theirs until their own notification arrives.
    fn forget_removed_registration(&self, key: &str, handler_id: HandlerId) {
        let mut removed = None;
        if let Some(mut registrations) = self.key_index.get_mut(key) {
            let position = registrations.iter().position(|registration| {
                registration.handler.handler_id() == handler_id
                    && registration.tokens.remove_token.is_some()
            });
            if let Some(position) = position {
                removed = Some(registrations.remove(position));
            }
        }
        self.key_index
            .remove_if(key, |_, registrations| registrations.is_empty());

        if let Some(registration) = removed {
            self.release_registration(&registration);
        }
    }

    /// Release every registration on `key`, returning how many tokens were freed
    fn forget_key(&self, key: &str) -> usize {
        let Some((_, registrations)) = self.key_index.remove(key) else {
            return 0;
        };
        registrations
            .iter()
            .map(|registration| self.release_registration(registration))
            .sum()
    }

    fn release_registration(&self, registration: &SelectiveRegistration) -> usize {
        let mut released = 0;
        if registration.tokens.update_token.is_some() {
            self.registry
                .unregister(CallbackCategory::ItemUpdated, &registration.handler);
            released += 1;
        }
        if registration.tokens.remove_token.is_some() {
            self.registry
                .unregister(CallbackCategory::ItemRemoved, &registration.handler);
            released += 1;
        }
        released
    }

    /// Unsubscribe and release `registrations`, continuing past engine errors
    fn drop_general(
        &self,
        handler: &EventCallback,
        registrations: &[GeneralRegistration],
    ) -> Result<()> {
        let mut first_error = None;
        for registration in registrations {
            self.routes.remove(&registration.subscription);
            if let Err(error) = self
                .engine
                .unregister_general_notification(registration.subscription)
            {
                warn!(
                    subscription = %registration.subscription,
                    event_type = %registration.event_type,
                    error = %error,
                    "Failed to drop engine subscription"
                );
                first_error.get_or_insert(error);
            }
            self.registry.unregister(registration.category, handler);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl NotificationListener for EventMultiplexer {
    fn on_notification(&self, notification: EngineNotification) {
        self.dispatch(notification);
    }

    fn on_key_registrations_dropped(&self, key: &str) {
        self.key_registrations_dropped(key);
    }
}

impl std::fmt::Debug for EventMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMultiplexer")
            .field("cache_id", &self.cache_id)
            .field("stats", &self.stats())
            .finish()
    }
}

struct DispatchListener(Weak<EventMultiplexer>);

impl NotificationListener for DispatchListener {
    fn on_notification(&self, notification: EngineNotification) {
        match self.0.upgrade() {
            Some(multiplexer) => multiplexer.dispatch(notification),
            None => debug!("Notification arrived after the session was dropped"),
        }
    }

    fn on_key_registrations_dropped(&self, key: &str) {
        if let Some(multiplexer) = self.0.upgrade() {
            multiplexer.key_registrations_dropped(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InMemoryEngine, NotificationPayload};
    use crate::serialization::JsonSerializer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<InMemoryEngine>, Arc<EventMultiplexer>) {
        let engine = Arc::new(InMemoryEngine::new("events"));
        let multiplexer = Arc::new(EventMultiplexer::new(
            "events",
            Arc::new(TokenRegistry::new()),
            engine.clone(),
            Arc::new(JsonSerializer),
        ));
        engine.attach_listener(multiplexer.listener());
        (engine, multiplexer)
    }

    fn counting_callback() -> (EventCallback, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback = EventCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, calls)
    }

    #[test]
    fn test_selective_rejects_item_added() {
        let (_, multiplexer) = setup();
        let (callback, _) = counting_callback();
        let result = multiplexer.register_selective(
            "k",
            &callback,
            EventType::ItemAdded | EventType::ItemUpdated,
            EventDataFilter::None,
        );
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        assert_eq!(multiplexer.registry().stats().total_entries, 0);
    }

    #[test]
    fn test_selective_registration_is_refcounted() {
        let (engine, multiplexer) = setup();
        let (callback, _) = counting_callback();
        let mask = EventType::ItemUpdated | EventType::ItemRemoved;

        let first = multiplexer
            .register_selective("a", &callback, mask, EventDataFilter::None)
            .unwrap();
        let second = multiplexer
            .register_selective("b", &callback, mask, EventDataFilter::None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            multiplexer
                .registry()
                .ref_count(CallbackCategory::ItemUpdated, &callback),
            Some(2)
        );

        multiplexer.unregister_selective("a", &callback, mask).unwrap();
        assert_eq!(engine.key_registration_count("a"), 0);
        assert_eq!(engine.key_registration_count("b"), 1);
        assert_eq!(
            multiplexer
                .registry()
                .ref_count(CallbackCategory::ItemUpdated, &callback),
            Some(1)
        );
    }

    #[test]
    fn test_unknown_token_is_dropped() {
        let (engine, _) = setup();
        engine.deliver(EngineNotification {
            target: NotificationTarget::Token {
                category: CallbackCategory::ItemUpdated,
                token: CallbackToken::new(42),
            },
            event_type: EventType::ItemUpdated,
            key: Some("ghost".to_string()),
            filter: EventDataFilter::MetadataAndData,
            payload: NotificationPayload::default(),
        });
    }

    #[test]
    fn test_general_descriptor_unregister_is_idempotent() {
        let (engine, multiplexer) = setup();
        let (callback, calls) = counting_callback();

        let descriptor = multiplexer
            .register_general(
                &callback,
                EventType::CacheCleared | EventType::Custom,
                EventDataFilter::None,
            )
            .unwrap();
        assert_eq!(engine.general_subscription_count(), 2);

        engine.publish(EventType::Custom, Some(serde_json::json!({"n": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        multiplexer.unregister(&descriptor).unwrap();
        multiplexer.unregister(&descriptor).unwrap();
        assert_eq!(engine.general_subscription_count(), 0);
        assert_eq!(multiplexer.registry().stats().total_entries, 0);

        engine.publish(EventType::Custom, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_general_filter_is_capped_by_registration() {
        let (engine, multiplexer) = setup();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = EventCallback::new(move |event| sink.lock().push(event.clone()));

        multiplexer
            .register_general(&callback, EventType::ItemAdded.into(), EventDataFilter::Metadata)
            .unwrap();
        engine.deliver(EngineNotification {
            target: NotificationTarget::Subscription(EngineSubscriptionId::new(1)),
            event_type: EventType::ItemAdded,
            key: Some("k".to_string()),
            filter: EventDataFilter::MetadataAndData,
            payload: NotificationPayload::default(),
        });

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].filter, EventDataFilter::Metadata);
    }
}

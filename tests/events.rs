mod common;

use cache_session::access::{Expiration, ItemPriority, ItemVersion};
use cache_session::engine::{
    EngineNotification, InMemoryEngine, ItemMetadata, NotificationPayload, NotificationTarget,
    RemoteEngine, StoredItem,
};
use cache_session::error::CacheError;
use cache_session::events::{
    EventCallback, EventDataFilter, EventMultiplexer, EventType, RemovedReason,
};
use cache_session::registry::{CallbackCategory, CallbackToken, TokenRegistry};
use cache_session::serialization::{JsonSerializer, Serializer};
use cache_session::session::InsertOptions;
use common::{recording_callback, session};
use serde_json::json;
use std::sync::Arc;

fn stored_item(value: serde_json::Value, version: u64) -> StoredItem {
    let now = chrono::Utc::now();
    StoredItem {
        value: JsonSerializer.serialize(&value).unwrap(),
        metadata: ItemMetadata {
            version: ItemVersion::new(version),
            created_at: now,
            last_modified: now,
            expiration: Expiration::never(),
            priority: ItemPriority::Normal,
            group: None,
            sub_group: None,
        },
    }
}

#[test]
fn test_token_notification_reaches_handler_with_metadata_only() {
    let engine = Arc::new(InMemoryEngine::new("tokens"));
    let registry = Arc::new(TokenRegistry::new());
    let multiplexer = Arc::new(EventMultiplexer::new(
        "tokens",
        registry.clone(),
        engine.clone(),
        Arc::new(JsonSerializer),
    ));
    engine.attach_listener(multiplexer.listener());

    // Occupy tokens 0..=4 for updates and 0..=5 for removals
    let fillers: Vec<EventCallback> = (0..6).map(|_| EventCallback::new(|_| {})).collect();
    for filler in &fillers[..5] {
        registry.register(CallbackCategory::ItemUpdated, filler).unwrap();
    }
    for filler in &fillers {
        registry.register(CallbackCategory::ItemRemoved, filler).unwrap();
    }

    let (handler, events) = recording_callback();
    let tokens = multiplexer
        .register_selective(
            "order:7",
            &handler,
            EventType::ItemUpdated | EventType::ItemRemoved,
            EventDataFilter::Metadata,
        )
        .unwrap();
    assert_eq!(tokens.update_token, Some(CallbackToken::new(5)));
    assert_eq!(tokens.remove_token, Some(CallbackToken::new(6)));

    engine.deliver(EngineNotification {
        target: NotificationTarget::Token {
            category: CallbackCategory::ItemUpdated,
            token: CallbackToken::new(5),
        },
        event_type: EventType::ItemUpdated,
        key: Some("order:7".to_string()),
        filter: EventDataFilter::Metadata,
        payload: NotificationPayload {
            item: Some(stored_item(json!({"status": "shipped"}), 12)),
            ..NotificationPayload::default()
        },
    });

    let events = events.lock();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event_type, EventType::ItemUpdated);
    assert_eq!(event.key.as_deref(), Some("order:7"));
    let item = event.item.as_ref().expect("metadata should be attached");
    assert_eq!(item.version, ItemVersion::new(12));
    assert_eq!(item.value, None);
}

#[test]
fn test_key_callback_sees_updates_then_removal() {
    let (engine, session) = session();
    session.insert("cart:1", &json!({"items": 1})).unwrap();

    let (handler, events) = recording_callback();
    session
        .register_key_callback(
            "cart:1",
            &handler,
            EventType::ItemUpdated | EventType::ItemRemoved,
            EventDataFilter::MetadataAndData,
        )
        .unwrap();

    session.insert("cart:1", &json!({"items": 2})).unwrap();
    session.delete("cart:1").unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::ItemUpdated);
    assert_eq!(
        events[0].item.as_ref().and_then(|item| item.value.clone()),
        Some(json!({"items": 2}))
    );
    assert_eq!(
        events[0].old_item.as_ref().and_then(|item| item.value.clone()),
        Some(json!({"items": 1}))
    );
    assert_eq!(events[1].event_type, EventType::ItemRemoved);
    assert_eq!(events[1].reason, Some(RemovedReason::Removed));

    // The engine forgets registrations together with the item
    assert_eq!(engine.key_registration_count("cart:1"), 0);
    assert_eq!(session.multiplexer_stats().selective_keys, 0);
}

#[test]
fn test_selective_registration_rejects_item_added() {
    let (engine, session) = session();
    let (handler, _) = recording_callback();
    let result = session.register_key_callback(
        "k",
        &handler,
        EventType::ItemAdded.into(),
        EventDataFilter::None,
    );
    assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
    assert_eq!(engine.key_registration_count("k"), 0);
}

#[test]
fn test_shared_handler_across_keys_keeps_one_token() {
    let (engine, session) = session();
    let (handler, events) = recording_callback();
    let first = session
        .register_keys_callback(
            &["a", "b"],
            &handler,
            EventType::ItemUpdated.into(),
            EventDataFilter::None,
        )
        .unwrap();
    assert_eq!(engine.key_registration_count("a"), 1);
    assert_eq!(engine.key_registration_count("b"), 1);

    session
        .unregister_key_callback("a", &handler, EventType::ItemUpdated.into())
        .unwrap();
    let stats = session.registry_stats();
    assert_eq!(stats.live_entries.get(&CallbackCategory::ItemUpdated), Some(&1));

    session.insert("b", &1).unwrap();
    session.insert("b", &2).unwrap();
    assert_eq!(events.lock().len(), 1);

    let again = session
        .register_key_callback("c", &handler, EventType::ItemUpdated.into(), EventDataFilter::None)
        .unwrap();
    assert_eq!(again.update_token, first.update_token);
}

#[test]
fn test_write_callbacks_attach_to_key() {
    let (_, session) = session();
    let (on_update, updates) = recording_callback();
    let (on_remove, removals) = recording_callback();

    session
        .insert_with(
            "session:abc",
            &"v1",
            InsertOptions::new()
                .on_update(on_update, EventDataFilter::None)
                .on_remove(on_remove, EventDataFilter::Metadata),
        )
        .unwrap();
    session.insert("session:abc", &"v2").unwrap();
    session.remove::<String>("session:abc").unwrap();

    assert_eq!(updates.lock().len(), 1);
    assert!(updates.lock()[0].item.is_none());
    let removals = removals.lock();
    assert_eq!(removals.len(), 1);
    assert!(removals[0].item.as_ref().is_some_and(|item| item.value.is_none()));
}

#[test]
fn test_general_subscription_lifecycle() {
    let (engine, session) = session();
    let (handler, events) = recording_callback();
    let descriptor = session
        .register_cache_event(
            &handler,
            EventType::ItemAdded | EventType::Custom,
            EventDataFilter::MetadataAndData,
        )
        .unwrap();
    assert_eq!(engine.general_subscription_count(), 2);

    session.add("fresh", &5).unwrap();
    engine.publish(EventType::Custom, Some(json!({"deploy": "v2"})));

    {
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::ItemAdded);
        assert_eq!(
            events[0].item.as_ref().and_then(|item| item.value.clone()),
            Some(json!(5))
        );
        assert_eq!(events[1].custom_data, Some(json!({"deploy": "v2"})));
    }

    session.unregister_cache_event(&descriptor).unwrap();
    session.unregister_cache_event(&descriptor).unwrap();
    assert_eq!(engine.general_subscription_count(), 0);

    session.add("later", &6).unwrap();
    assert_eq!(events.lock().len(), 2);
}

#[test]
fn test_clear_drops_key_callbacks_but_keeps_cache_events() {
    let (engine, session) = session();
    let (key_handler, key_events) = recording_callback();
    let (cache_handler, cache_events) = recording_callback();

    session.insert("k", &1).unwrap();
    session
        .register_key_callback("k", &key_handler, EventType::ItemUpdated.into(), EventDataFilter::None)
        .unwrap();
    session
        .register_cache_event(
            &cache_handler,
            EventType::CacheCleared | EventType::ItemAdded,
            EventDataFilter::None,
        )
        .unwrap();

    session.clear().unwrap();
    assert_eq!(session.multiplexer_stats().selective_keys, 0);
    assert_eq!(engine.key_registration_count("k"), 0);
    assert_eq!(
        session
            .registry_stats()
            .live_entries
            .get(&CallbackCategory::ItemUpdated)
            .copied()
            .unwrap_or(0),
        0
    );

    session.insert("k", &2).unwrap();
    session.insert("k", &3).unwrap();
    assert!(key_events.lock().is_empty());

    let cache_events = cache_events.lock();
    assert_eq!(cache_events.len(), 2);
    assert_eq!(cache_events[0].event_type, EventType::CacheCleared);
    assert_eq!(cache_events[1].event_type, EventType::ItemAdded);
}

#[test]
fn test_unknown_token_is_dropped() {
    let (engine, session) = session();
    let (handler, events) = recording_callback();
    session
        .register_key_callback("k", &handler, EventType::ItemRemoved.into(), EventDataFilter::None)
        .unwrap();

    engine.deliver(EngineNotification {
        target: NotificationTarget::Token {
            category: CallbackCategory::ItemRemoved,
            token: CallbackToken::new(400),
        },
        event_type: EventType::ItemRemoved,
        key: Some("k".to_string()),
        filter: EventDataFilter::None,
        payload: NotificationPayload::default(),
    });
    assert!(events.lock().is_empty());
}

#[test]
fn test_every_removal_handler_fires_once() {
    let (engine, session) = session();
    session.insert("k", &1).unwrap();
    let (first, first_events) = recording_callback();
    let (second, second_events) = recording_callback();
    for handler in [&first, &second] {
        session
            .register_key_callback("k", handler, EventType::ItemRemoved.into(), EventDataFilter::None)
            .unwrap();
    }
    assert_eq!(engine.key_registration_count("k"), 2);

    session.delete("k").unwrap();

    assert_eq!(first_events.lock().len(), 1);
    assert_eq!(second_events.lock().len(), 1);
    assert_eq!(session.registry_stats().total_entries, 0);
    assert_eq!(session.multiplexer_stats().selective_keys, 0);
}

#[test]
fn test_update_only_registration_released_on_removal() {
    let (engine, session) = session();
    session.insert("k", &1).unwrap();
    let (handler, events) = recording_callback();
    session
        .register_key_callback("k", &handler, EventType::ItemUpdated.into(), EventDataFilter::None)
        .unwrap();
    session
        .insert_with(
            "k",
            &2,
            InsertOptions::new().on_update(handler.clone(), EventDataFilter::None),
        )
        .unwrap();
    assert_eq!(session.registry_stats().total_entries, 1);

    session.delete("k").unwrap();

    assert_eq!(events.lock().len(), 1);
    assert_eq!(engine.key_registration_count("k"), 0);
    assert_eq!(session.registry_stats().total_entries, 0);
    assert_eq!(session.multiplexer_stats().selective_keys, 0);
}

#[test]
fn test_update_only_registration_released_on_expiration() {
    let (_, session) = session();
    session
        .insert_with(
            "flash",
            &1,
            InsertOptions::new().expiration(Expiration::absolute(
                chrono::Utc::now() + chrono::Duration::milliseconds(30),
            )),
        )
        .unwrap();
    let (handler, events) = recording_callback();
    session
        .register_key_callback("flash", &handler, EventType::ItemUpdated.into(), EventDataFilter::None)
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(80));
    assert_eq!(session.get::<i32>("flash").unwrap(), None);

    assert!(events.lock().is_empty());
    assert_eq!(session.registry_stats().total_entries, 0);
    assert_eq!(session.multiplexer_stats().selective_keys, 0);
}

#[test]
fn test_panicking_handler_does_not_break_writes() {
    let (_, session) = session();
    session.insert("k", &1).unwrap();
    let exploding = EventCallback::new(|_| panic!("handler failure"));
    let (handler, events) = recording_callback();
    for callback in [&exploding, &handler] {
        session
            .register_key_callback("k", callback, EventType::ItemUpdated.into(), EventDataFilter::None)
            .unwrap();
    }

    session.insert("k", &2).unwrap();
    session.insert("k", &3).unwrap();

    assert_eq!(events.lock().len(), 2);
    assert_eq!(session.get::<i32>("k").unwrap(), Some(3));
}

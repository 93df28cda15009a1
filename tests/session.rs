mod common;

use cache_session::access::{AccessRequest, Expiration, ItemPriority, ItemVersion};
use cache_session::config::SessionConfig;
use cache_session::engine::InMemoryEngine;
use cache_session::error::CacheError;
use cache_session::events::{EventDataFilter, EventType};
use cache_session::session::{AsyncCallback, AsyncOperation, AsyncResult, CacheSession, InsertOptions};
use cache_session::registry::CallbackCategory;
use common::session;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_basic_round_trip() {
    let (_, session) = session();
    assert_eq!(session.get::<String>("missing").unwrap(), None);

    session.insert("greeting", &"hello").unwrap();
    assert_eq!(session.get::<String>("greeting").unwrap().as_deref(), Some("hello"));
    assert!(session.contains("greeting").unwrap());
    assert_eq!(session.count().unwrap(), 1);

    assert_eq!(
        session.remove::<String>("greeting").unwrap().as_deref(),
        Some("hello")
    );
    assert!(!session.contains("greeting").unwrap());
}

#[test]
fn test_add_refuses_existing_key() {
    let (_, session) = session();
    session.add("unique", &1).unwrap();
    assert!(matches!(
        session.add("unique", &2),
        Err(CacheError::KeyExists { .. })
    ));
    assert_eq!(session.get::<i32>("unique").unwrap(), Some(1));

    session.set_exceptions_enabled(false);
    assert_eq!(session.add("unique", &3).unwrap(), ItemVersion::NONE);
}

#[test]
fn test_bulk_read_skips_missing_and_duplicates() {
    let (_, session) = session();
    session.insert("a", &1).unwrap();
    session.insert("b", &2).unwrap();

    let values = session.get_bulk::<i32>(&["a", "b", "a", "zzz"]).unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values["a"], 1);
    assert_eq!(values["b"], 2);

    assert!(matches!(
        session.get_bulk::<i32>(&[]),
        Err(CacheError::InvalidArgument(_))
    ));
}

#[test]
fn test_cache_item_carries_metadata() {
    let (_, session) = session();
    let version = session
        .insert_with(
            "report",
            &vec!["q1", "q2"],
            InsertOptions::new()
                .priority(ItemPriority::High)
                .expiration(Expiration::sliding(Duration::from_secs(600)))
                .group("finance", None),
        )
        .unwrap();

    let item = session.get_cache_item::<Vec<String>>("report").unwrap().unwrap();
    assert_eq!(item.version, version);
    assert_eq!(item.priority, ItemPriority::High);
    assert_eq!(item.group.as_deref(), Some("finance"));
    assert_eq!(item.expiration.sliding_window(), Some(Duration::from_secs(600)));
    assert_eq!(item.value, vec!["q1".to_string(), "q2".to_string()]);
}

#[test]
fn test_absolute_expiration_hides_item() {
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
    assert!(session.contains("flash").unwrap());
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(session.get::<i32>("flash").unwrap(), None);
}

#[test]
fn test_async_operations_report_completion() {
    let (_, session) = session();
    let results: Arc<Mutex<Vec<AsyncResult>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let callback = AsyncCallback::new(move |result| sink.lock().push(result.clone()));

    for index in 0..5 {
        session
            .insert_async(&format!("async:{index}"), &index, InsertOptions::new(), Some(&callback))
            .unwrap();
    }
    session.wait_for_async().unwrap();
    assert_eq!(session.pending_async(), 0);
    assert_eq!(session.count().unwrap(), 5);

    session.add_async("async:0", &99, InsertOptions::new(), Some(&callback)).unwrap();
    session.remove_async("async:1", None).unwrap();
    session.wait_for_async().unwrap();

    let results = results.lock();
    assert_eq!(results.len(), 6);
    let inserts: Vec<&AsyncResult> = results
        .iter()
        .filter(|result| result.operation == AsyncOperation::Insert)
        .collect();
    assert_eq!(inserts.len(), 5);
    assert!(inserts.iter().all(|result| result.result.is_ok()));

    let add = results
        .iter()
        .find(|result| result.operation == AsyncOperation::Add)
        .unwrap();
    assert!(matches!(add.result, Err(CacheError::KeyExists { .. })));

    assert_eq!(session.get::<i32>("async:1").unwrap(), None);
    let stats = session.async_registry_stats();
    assert_eq!(stats.total_entries, 0);
    assert!(!stats.live_entries.contains_key(&CallbackCategory::AsyncUpdate));
}

#[test]
fn test_async_validation_errors_return_immediately() {
    let (engine, session) = session();
    assert!(matches!(
        session.insert_async("", &1, InsertOptions::new(), None),
        Err(CacheError::InvalidArgument(_))
    ));
    assert_eq!(session.pending_async(), 0);
    assert_eq!(engine.call_counts().total, 0);
}

#[test]
fn test_clear_async_empties_cache() {
    let (_, session) = session();
    session.insert("x", &1).unwrap();
    session.insert("y", &2).unwrap();
    session.clear_async(None).unwrap();
    session.wait_for_async().unwrap();
    assert_eq!(session.count().unwrap(), 0);
}

#[test]
fn test_disabled_exceptions_from_config() {
    let engine = Arc::new(InMemoryEngine::new("quiet"));
    let mut config = SessionConfig::for_cache("quiet");
    config.exceptions_enabled = false;
    let session = CacheSession::new(engine, config).unwrap();

    session.insert("k", &1).unwrap();
    session.lock("k", Duration::ZERO).unwrap().unwrap();
    assert_eq!(session.lock("k", Duration::ZERO).unwrap(), None);
    assert!(matches!(session.get::<i32>(""), Err(CacheError::InvalidArgument(_))));
}

#[test]
fn test_dispose_releases_engine_state() {
    let (engine, session) = session();
    let (handler, _) = common::recording_callback();
    session.insert("k", &1).unwrap();
    session
        .register_cache_event(
            &handler,
            cache_session::events::EventType::ItemRemoved.into(),
            cache_session::events::EventDataFilter::None,
        )
        .unwrap();
    assert_eq!(engine.general_subscription_count(), 1);

    session.dispose().unwrap();
    assert_eq!(engine.general_subscription_count(), 0);
    assert_eq!(session.registry_stats().total_entries, 0);
    assert!(matches!(session.get::<i32>("k"), Err(CacheError::NotInitialized)));
    assert!(matches!(
        session.insert_async("k", &2, InsertOptions::new(), None),
        Err(CacheError::NotInitialized)
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = SessionConfig::for_cache("broken");
    config.enumeration.chunk_size = 0;
    let result = CacheSession::new(Arc::new(InMemoryEngine::new("broken")), config);
    assert!(matches!(result, Err(CacheError::Configuration(_))));
}

#[test]
fn test_panicking_async_callback_keeps_session_usable() {
    let (_, session) = session();
    let exploding = AsyncCallback::new(|_| panic!("completion failure"));
    for index in 0..3 {
        session
            .insert_async(&format!("boom:{index}"), &index, InsertOptions::new(), Some(&exploding))
            .unwrap();
    }
    session.wait_for_async().unwrap();
    assert_eq!(session.pending_async(), 0);
    assert_eq!(session.async_registry_stats().total_entries, 0);

    let completed = Arc::new(Mutex::new(0));
    let counter = completed.clone();
    let callback = AsyncCallback::new(move |_| *counter.lock() += 1);
    session
        .insert_async("after", &1, InsertOptions::new(), Some(&callback))
        .unwrap();
    session.wait_for_async().unwrap();
    assert_eq!(*completed.lock(), 1);
    assert_eq!(session.count().unwrap(), 4);
}

#[test]
fn test_bulk_insert_reports_failed_keys() {
    let (_, session) = session();
    session.insert("taken", &0).unwrap();

    let failed = session
        .add_bulk(&[("fresh", 1), ("taken", 2), ("fresh", 3)], InsertOptions::new())
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(matches!(failed["taken"], CacheError::KeyExists { .. }));
    assert_eq!(session.get::<i32>("fresh").unwrap(), Some(3));
    assert_eq!(session.get::<i32>("taken").unwrap(), Some(0));

    let failed = session
        .insert_bulk(&[("taken", 5), ("other", 6)], InsertOptions::new())
        .unwrap();
    assert!(failed.is_empty());
    assert_eq!(session.get::<i32>("taken").unwrap(), Some(5));
    assert_eq!(session.count().unwrap(), 3);
}

#[test]
fn test_bulk_insert_attaches_callbacks_per_key() {
    let (engine, session) = session();
    let (on_remove, removals) = common::recording_callback();

    let failed = session
        .insert_bulk(
            &[("s:1", 1), ("s:2", 2)],
            InsertOptions::new().on_remove(on_remove, EventDataFilter::None),
        )
        .unwrap();
    assert!(failed.is_empty());
    assert_eq!(engine.key_registration_count("s:1"), 1);
    assert_eq!(engine.key_registration_count("s:2"), 1);

    session.delete("s:2").unwrap();
    {
        let removals = removals.lock();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].key.as_deref(), Some("s:2"));
    }
    assert_eq!(
        session.registry_stats().live_entries.get(&CallbackCategory::ItemRemoved),
        Some(&1)
    );
}

#[test]
fn test_bulk_writes_validate_before_engine() {
    let (engine, session) = session();
    let empty: [(&str, i32); 0] = [];
    assert!(matches!(
        session.insert_bulk(&empty, InsertOptions::new()),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.insert_bulk(&[("a", 1), ("", 2)], InsertOptions::new()),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.add_bulk(
            &[("a", 1)],
            InsertOptions::new().access(AccessRequest::compare_version(ItemVersion::new(1))),
        ),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(session.remove_bulk::<i32>(&[]), Err(CacheError::InvalidArgument(_))));
    assert!(matches!(session.delete_bulk(&["a", ""]), Err(CacheError::InvalidArgument(_))));
    assert_eq!(engine.call_counts().total, 0);
}

#[test]
fn test_bulk_remove_returns_existing_values() {
    let (_, session) = session();
    session.insert("a", &1).unwrap();
    session.insert("b", &2).unwrap();
    session.insert("c", &3).unwrap();

    let removed = session.remove_bulk::<i32>(&["a", "b", "a", "missing"]).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(removed["a"], 1);
    assert_eq!(removed["b"], 2);

    session.delete_bulk(&["c", "missing"]).unwrap();
    assert_eq!(session.count().unwrap(), 0);
}

#[test]
fn test_is_locked_ignores_own_handle() {
    let (_, session) = session();
    assert!(!session.is_locked("k", None).unwrap());
    session.insert("k", &1).unwrap();
    assert!(!session.is_locked("k", None).unwrap());

    let handle = session.lock("k", Duration::ZERO).unwrap().unwrap();
    assert!(session.is_locked("k", None).unwrap());
    assert!(!session.is_locked("k", Some(&handle)).unwrap());
    assert_eq!(
        session.lock_holder("k").unwrap().map(|current| current.lock_id().to_string()),
        Some(handle.lock_id().to_string())
    );

    session.unlock("k", Some(&handle)).unwrap();
    assert!(!session.is_locked("k", None).unwrap());
    assert!(matches!(session.is_locked("", None), Err(CacheError::InvalidArgument(_))));
}

#[test]
fn test_multi_key_registration_rolls_back_on_failure() {
    let (engine, session) = session();
    engine.reject_key_registrations("b");
    let (handler, _) = common::recording_callback();

    let result = session.register_keys_callback(
        &["a", "b", "c"],
        &handler,
        EventType::ItemUpdated | EventType::ItemRemoved,
        EventDataFilter::None,
    );
    assert!(matches!(result, Err(CacheError::Engine(_))));
    assert_eq!(engine.key_registration_count("a"), 0);
    assert_eq!(engine.key_registration_count("c"), 0);
    assert_eq!(session.registry_stats().total_entries, 0);
    assert_eq!(session.multiplexer_stats().selective_keys, 0);

    let tokens = session
        .register_keys_callback(&["a", "c"], &handler, EventType::ItemUpdated.into(), EventDataFilter::None)
        .unwrap();
    assert!(tokens.update_token.is_some());
    assert_eq!(engine.key_registration_count("a"), 1);
    assert_eq!(engine.key_registration_count("c"), 1);
}

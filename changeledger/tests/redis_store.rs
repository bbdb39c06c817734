//! Contract tests against a live Redis at `REDIS_URL` (default `redis://127.0.0.1/`).
//!
//! Run with `cargo test -- --ignored`.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use changeledger::{
    ChangeEntry, ChangeEntryRepository, KeyValueStore, Lifecycle, LockError, LockManager, LockOptions,
    LockRepository, LockStatus, RedisStore, RepoError, RepositoryOptions, SchemaError, StoreError,
    change_entry_key_schema, generate_execution_id,
    store::{AttributeType, KeySchema, PutCondition},
};
use redis::AsyncCommands;
use serde_json::{Value, json};
use serial_test::serial;

static NAMESPACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

/// A store under a fresh key prefix so runs never see each other's tables.
async fn isolated_store() -> RedisStore {
    let idx = NAMESPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let salt = generate_execution_id();
    let prefix = format!("changeledger_test_{idx}_{}", &salt[5..13]);
    RedisStore::connect(&redis_url(), prefix).await.expect("redis store")
}

fn repo(store: &RedisStore, table: &str, page_size: usize) -> ChangeEntryRepository<RedisStore> {
    ChangeEntryRepository::with_options(
        store.clone(),
        table,
        RepositoryOptions {
            ready_poll_interval: Duration::from_millis(5),
            scan_page_size: page_size,
            conflict_backoff: Duration::from_millis(1),
            ..RepositoryOptions::default()
        },
    )
    .expect("valid table")
}

fn entry(change_id: &str) -> ChangeEntry {
    ChangeEntry::new("executionId", change_id, "author", "changeLogClass")
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn initialize_rejects_missing_table_without_creation() {
    let store = isolated_store().await;
    let repository = repo(&store, "for-initialize-1", 100);

    let err = repository.initialize(false).await.unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::CreationNotAllowed { .. })));
    assert!(!store.table_exists("for-initialize-1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn initialize_creates_then_accepts_existing_table() {
    let store = isolated_store().await;
    repo(&store, "for-initialize-2", 100).initialize(true).await.unwrap();

    let description = store.describe_table("for-initialize-2").await.unwrap().unwrap();
    assert_eq!(description.key_schema, change_entry_key_schema());

    let again = repo(&store, "for-initialize-2", 100);
    again.initialize(false).await.unwrap();
    assert_eq!(again.lifecycle(), Lifecycle::Ready);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn wrongly_shaped_table_is_rejected() {
    let store = isolated_store().await;
    store
        .create_table("for-initialize-3", &KeySchema::partition("executionId", AttributeType::String))
        .await
        .unwrap();
    let err = repo(&store, "for-initialize-3", 100).initialize(true).await.unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::CreationNotAllowed { .. })));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn second_create_reports_existing_table() {
    let store = isolated_store().await;
    store.create_table("dup", &change_entry_key_schema()).await.unwrap();
    assert_eq!(
        store.create_table("dup", &change_entry_key_schema()).await.unwrap_err(),
        StoreError::TableAlreadyExists("dup".into())
    );
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn conditional_puts_are_enforced_by_the_script() {
    let store = isolated_store().await;
    store.create_table("puts", &change_entry_key_schema()).await.unwrap();

    let first = object(json!({"changeId": "c1", "_revision": 1}));
    store.put_item("puts", first.clone(), Some(PutCondition::NotExists)).await.unwrap();
    assert_eq!(
        store.put_item("puts", first, Some(PutCondition::NotExists)).await.unwrap_err(),
        StoreError::ConditionFailed
    );

    let second = object(json!({"changeId": "c1", "_revision": 2}));
    assert_eq!(
        store
            .put_item("puts", second.clone(), Some(PutCondition::RevisionEquals { revision: 5 }))
            .await
            .unwrap_err(),
        StoreError::ConditionFailed
    );
    store
        .put_item("puts", second, Some(PutCondition::RevisionEquals { revision: 1 }))
        .await
        .unwrap();
    assert_eq!(store.get_item("puts", "c1").await.unwrap().unwrap()["_revision"], json!(2));

    let keyless = object(json!({"author": "nobody"}));
    assert!(matches!(
        store.put_item("puts", keyless, None).await.unwrap_err(),
        StoreError::Codec(_)
    ));
    assert_eq!(
        store.put_item("absent", object(json!({"changeId": "c1"})), None).await.unwrap_err(),
        StoreError::TableNotFound("absent".into())
    );
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn save_update_and_log_round_trip() {
    let store = isolated_store().await;
    let repository = repo(&store, "for-save-2", 2);
    repository.initialize(true).await.unwrap();
    assert!(repository.get_entries_log().await.unwrap().is_empty());

    for id in ["changeId1", "changeId2", "changeId3"] {
        repository.save_or_update(entry(id)).await.unwrap();
    }
    let mut updated = entry("changeId1");
    updated.change_log_class = "changeLogClass_updated".into();
    repository.save_or_update(updated).await.unwrap();

    let entries = repository.get_entries_log().await.unwrap();
    let ids: HashSet<_> = entries.iter().map(|e| e.change_id.clone()).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(entries.len(), 3);
    let stored = entries.iter().find(|e| e.change_id == "changeId1").unwrap();
    assert_eq!(stored.execution_id, "executionId");
    assert_eq!(stored.change_log_class, "changeLogClass_updated");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Redis"]
#[serial]
async fn parallel_saves_leave_one_coherent_record() {
    let store = isolated_store().await;
    let repository = Arc::new(repo(&store, "contended", 100));
    repository.initialize(true).await.unwrap();

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let repository = Arc::clone(&repository);
            tokio::spawn(async move {
                let entry = ChangeEntry::new("executionId", "same", "author", format!("ChangeLog{i}"))
                    .with_execution_millis(i);
                repository.save_or_update(entry).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = repository.get_entries_log().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].change_log_class, format!("ChangeLog{}", entries[0].execution_millis));
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn deleted_descriptor_surfaces_as_not_initialized() {
    let store = isolated_store().await;
    let repository = repo(&store, "vanishing", 100);
    repository.initialize(true).await.unwrap();

    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = conn.del(format!("{}:table:vanishing", store.prefix())).await.unwrap();

    let err = repository.save_or_update(entry("c1")).await.unwrap_err();
    assert!(matches!(err, RepoError::NotInitialized { .. }));
    assert_eq!(repository.lifecycle(), Lifecycle::Uninitialized);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
#[serial]
async fn lock_is_exclusive_until_released() {
    let store = isolated_store().await;
    let locks = LockRepository::new(store.clone(), "migrationLock").unwrap();
    locks.initialize(true).await.unwrap();
    let options = LockOptions {
        acquired_for: Duration::from_secs(30),
        quit_trying_after: Duration::from_millis(200),
        try_frequency: Duration::from_millis(20),
    };

    let first = LockManager::new(locks.clone(), options.clone()).with_owner("runner-a");
    let second = LockManager::new(locks.clone(), options).with_owner("runner-b");
    first.acquire().await.unwrap();
    assert!(matches!(second.acquire().await, Err(LockError::QuitTrying { .. })));

    first.release().await;
    let stored = locks.find_by_key(first.key()).await.unwrap().unwrap();
    assert_eq!(stored.status, LockStatus::Released);
    second.acquire().await.unwrap();
    assert_eq!(locks.find_by_key(first.key()).await.unwrap().unwrap().owner, "runner-b");
}

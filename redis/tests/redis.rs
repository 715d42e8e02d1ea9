//! Integration tests against a live Redis instance.
//!
//! Ignored by default. Point `REDIS_URL` at a scratch Redis and run:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p questline-redis -- --ignored
//! ```
//!
//! Routing keys are unique per run, so tests can share an instance and run
//! repeatedly without cleanup.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use questline_core::Utc;
use questline_core::spool::{SpoolStore, SpooledEvent};
use questline_redis::RedisSpoolStore;
use serde_json::json;
use uuid::Uuid;

async fn store() -> RedisSpoolStore {
    let url =
        std::env::var("REDIS_URL").expect("set REDIS_URL to run the Redis integration tests");
    RedisSpoolStore::new(&url).await.expect("connect to Redis")
}

fn unique_key(prefix: &str) -> String {
    format!("{prefix}.{}", Uuid::new_v4().simple())
}

fn entry(marker: u32) -> SpooledEvent {
    SpooledEvent::new(json!({ "marker": marker }), Utc::now())
}

#[tokio::test]
#[ignore = "needs a live Redis at REDIS_URL"]
async fn test_spool_batch_round_trips_in_order() {
    let store = store().await;
    let key = unique_key("achievement.progress.updated");

    for marker in 0..5 {
        store.append(&key, entry(marker)).await.unwrap();
    }

    let batch = store.read_all(&key).await.unwrap();
    assert_eq!(batch.len(), 5);
    for (index, spooled) in batch.iter().enumerate() {
        assert_eq!(spooled.data["marker"], index);
    }

    store.delete_key(&key).await.unwrap();
    assert!(store.read_all(&key).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "needs a live Redis at REDIS_URL"]
async fn test_missing_key_reads_empty_and_deletes_cleanly() {
    let store = store().await;
    let key = unique_key("quest.completed");

    assert!(store.read_all(&key).await.unwrap().is_empty());
    store.delete_key(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "needs a live Redis at REDIS_URL"]
async fn test_list_keys_returns_plain_routing_keys() {
    let store = store().await;
    let key = unique_key("user.points.added");

    store.append(&key, entry(1)).await.unwrap();

    let keys = store.list_keys().await.unwrap();
    assert!(keys.contains(&key), "expected {key} in {keys:?}");
    assert!(keys.iter().all(|k| !k.starts_with("spool:")));

    store.delete_key(&key).await.unwrap();
    assert!(!store.list_keys().await.unwrap().contains(&key));
}

#[tokio::test]
#[ignore = "needs a live Redis at REDIS_URL"]
async fn test_entries_preserve_payload_and_timestamp() {
    let store = store().await;
    let key = unique_key("enemy.defeated");
    let spooled = SpooledEvent::new(json!({ "enemyId": "slime", "level": 3 }), Utc::now());

    store.append(&key, spooled.clone()).await.unwrap();

    let batch = store.read_all(&key).await.unwrap();
    assert_eq!(batch, vec![spooled]);

    store.delete_key(&key).await.unwrap();
}

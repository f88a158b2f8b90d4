//! Contract tests for [`RedisStorage`] against a live Redis instance.
//!
//! Gated on `THROTTLECORE_REDIS_URL` so the suite runs cleanly without a
//! Redis instance present; set the variable (e.g. `redis://127.0.0.1:6379`)
//! and run with `--features redis` to exercise these.

#![cfg(feature = "redis")]

use std::time::Duration;

use throttlecore::{RedisConfig, RedisStorage, Storage};

async fn connect() -> Option<RedisStorage> {
    let url = std::env::var("THROTTLECORE_REDIS_URL").ok()?;
    let config = RedisConfig::new(url).with_prefix(format!("throttlecore-test:{}:", uuid_like_suffix()));
    RedisStorage::new(config).await.ok()
}

// Avoids depending on the `uuid` crate for a handful of test-local prefixes.
fn uuid_like_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("{nanos:x}")
}

#[tokio::test]
async fn set_then_get_round_trips() {
    let Some(storage) = connect().await else { return };
    storage.set("k", "v".to_string(), Some(Duration::from_secs(30))).await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), Some("v".to_string()));
}

#[tokio::test]
async fn incr_is_atomic_across_concurrent_callers() {
    let Some(storage) = connect().await else { return };
    let storage = std::sync::Arc::new(storage);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage.incr("counter", 1, Some(Duration::from_secs(30))).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(storage.get("counter").await.unwrap(), Some("50".to_string()));
}

#[tokio::test]
async fn decr_floors_at_zero_and_never_creates_a_key() {
    let Some(storage) = connect().await else { return };
    assert_eq!(storage.decr("absent", 5).await.unwrap(), 0);
    assert_eq!(storage.exists("absent").await.unwrap(), false);

    storage.set("present", "3".to_string(), Some(Duration::from_secs(30))).await.unwrap();
    assert_eq!(storage.decr("present", 10).await.unwrap(), 0);
}

#[tokio::test]
async fn remove_then_exists_is_false() {
    let Some(storage) = connect().await else { return };
    storage.set("gone", "1".to_string(), Some(Duration::from_secs(30))).await.unwrap();
    storage.remove("gone").await.unwrap();
    assert_eq!(storage.exists("gone").await.unwrap(), false);
}

#[tokio::test]
async fn expire_sets_a_ttl_on_an_existing_key() {
    let Some(storage) = connect().await else { return };
    storage.set("ttl-key", "1".to_string(), Some(Duration::from_secs(30))).await.unwrap();
    storage.expire("ttl-key", Duration::from_millis(200)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(storage.get("ttl-key").await.unwrap(), None);
}

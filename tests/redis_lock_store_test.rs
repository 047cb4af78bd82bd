use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

use settlement_engine::adapters::RedisLockStore;
use settlement_engine::services::{LockManager, SETTLEMENT_LOCK_KEY};

async fn setup_locks() -> (LockManager, impl std::any::Any) {
    let container = Redis::default().start().await.unwrap();
    let host_port = container.get_host_port_ipv4(6379).await.unwrap();
    let store = RedisLockStore::new(&format!("redis://127.0.0.1:{}", host_port)).unwrap();

    (
        LockManager::new(Arc::new(store), Duration::from_secs(2)),
        container,
    )
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_acquire_is_exclusive_until_release() {
    let (locks, _container) = setup_locks().await;

    let token = locks
        .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(25))
        .await
        .unwrap()
        .unwrap();
    assert!(locks
        .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(25))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        locks.current_holder(SETTLEMENT_LOCK_KEY).await.unwrap(),
        Some(token.clone())
    );

    assert!(!locks
        .release_lock(SETTLEMENT_LOCK_KEY, "not-the-holder")
        .await
        .unwrap());
    assert!(locks.release_lock(SETTLEMENT_LOCK_KEY, &token).await.unwrap());
    assert!(!locks.is_held(SETTLEMENT_LOCK_KEY).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_lock_expires_after_ttl() {
    let (locks, _container) = setup_locks().await;

    locks
        .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!locks.is_held(SETTLEMENT_LOCK_KEY).await.unwrap());
    assert!(locks
        .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(25))
        .await
        .unwrap()
        .is_some());
}

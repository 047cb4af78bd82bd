use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ports::{LockStore, LockStoreError, LockStoreResult};

pub const SETTLEMENT_LOCK_KEY: &str = "settlement-lock";

/// Advisory mutual exclusion on top of a shared [`LockStore`].
///
/// Every store round-trip is bounded by `operation_timeout`; a timed-out or
/// failed acquisition never grants the lock.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    operation_timeout: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
        }
    }

    /// Returns a fresh holder token, or `None` when someone else holds `key`.
    pub async fn acquire_lock(&self, key: &str, ttl: Duration) -> LockStoreResult<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .bounded(self.store.set_if_absent(key, &token, ttl))
            .await?;

        if acquired {
            info!(event = "lock_acquired", key, holder = %token, ttl_ms = ttl.as_millis() as u64);
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Deletes `key` only if `token` still holds it. Returns whether it did.
    pub async fn release_lock(&self, key: &str, token: &str) -> LockStoreResult<bool> {
        let released = self
            .bounded(self.store.compare_and_delete(key, token))
            .await?;

        if released {
            info!(event = "lock_released", key, holder = token);
        } else {
            warn!(
                event = "lock_release_skipped",
                key,
                holder = token,
                "lock expired or taken over before release"
            );
        }
        Ok(released)
    }

    pub async fn is_held(&self, key: &str) -> LockStoreResult<bool> {
        self.bounded(self.store.exists(key)).await
    }

    pub async fn current_holder(&self, key: &str) -> LockStoreResult<Option<String>> {
        self.bounded(self.store.get(key)).await
    }

    async fn bounded<T>(&self, op: impl Future<Output = LockStoreResult<T>>) -> LockStoreResult<T> {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| LockStoreError::Timeout(self.operation_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLockStore;
    use async_trait::async_trait;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(InMemoryLockStore::new()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused() {
        let locks = manager();
        let token = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(token.is_some());

        let second = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(
            locks.current_holder(SETTLEMENT_LOCK_KEY).await.unwrap(),
            token
        );
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let locks = manager();
        let token = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert!(!locks.release_lock(SETTLEMENT_LOCK_KEY, "someone-else").await.unwrap());
        assert!(locks.is_held(SETTLEMENT_LOCK_KEY).await.unwrap());

        assert!(locks.release_lock(SETTLEMENT_LOCK_KEY, &token).await.unwrap());
        assert!(!locks.is_held(SETTLEMENT_LOCK_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired_and_stale_holder_cannot_release() {
        let locks = manager();
        let stale = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stale, fresh);

        assert!(!locks.release_lock(SETTLEMENT_LOCK_KEY, &stale).await.unwrap());
        assert_eq!(
            locks.current_holder(SETTLEMENT_LOCK_KEY).await.unwrap(),
            Some(fresh)
        );
    }

    struct HangingStore;

    #[async_trait]
    impl LockStore for HangingStore {
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> LockStoreResult<bool> {
            std::future::pending().await
        }
        async fn get(&self, _: &str) -> LockStoreResult<Option<String>> {
            std::future::pending().await
        }
        async fn compare_and_delete(&self, _: &str, _: &str) -> LockStoreResult<bool> {
            std::future::pending().await
        }
        async fn exists(&self, _: &str) -> LockStoreResult<bool> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_closed() {
        let locks = LockManager::new(Arc::new(HangingStore), Duration::from_millis(20));
        let result = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(LockStoreError::Timeout(_))));
    }
}

//! Redis implementation of LockStore.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::ports::{LockStore, LockStoreResult};

const LOCK_PREFIX: &str = "lock:";

/// Deletes KEYS[1] only when it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLockStore {
    redis_client: redis::Client,
}

impl RedisLockStore {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    async fn connection(&self) -> LockStoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.redis_client.get_multiplexed_async_connection().await?)
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", LOCK_PREFIX, key)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockStoreResult<bool> {
        let mut conn = self.connection().await?;
        // SET NX PX replies OK on success and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::namespaced(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> LockStoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(Self::namespaced(key)).await?;
        Ok(value)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> LockStoreResult<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
            .key(Self::namespaced(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn exists(&self, key: &str) -> LockStoreResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(Self::namespaced(key)).await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(RedisLockStore::namespaced("settlement-lock"), "lock:settlement-lock");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisLockStore::new("not a url").is_err());
    }
}

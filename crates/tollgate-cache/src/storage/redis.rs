use std::time::Duration;

use async_trait::async_trait;

use crate::{CacheError, QuotaCache, WorkQueue};

/// Redis-backed cache and work queue
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisCache {
    /// Create a client for `url`; connections are opened per command
    pub fn new(url: &str, key_prefix: String) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(format!("invalid URL: {e}")))?;

        Ok(Self { client, key_prefix })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Backend(format!("connection failed: {e}")))
    }
}

#[async_trait]
impl QuotaCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        conn.get(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.key(key), value, ttl_secs)
            .await
            .map_err(|e| CacheError::Backend(format!("SET failed: {e}")))?;

        tracing::trace!(key, ttl_secs, "cache write");
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let ttl: i64 = conn
            .ttl(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("TTL failed: {e}")))?;

        // -2 = missing, -1 = no expiry
        Ok(u64::try_from(ttl).ok().map(Duration::from_secs))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.key(key))
            .await
            .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for RedisCache {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CacheError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let _: () = conn
            .rpush(self.key(topic), payload)
            .await
            .map_err(|e| CacheError::Backend(format!("RPUSH failed: {e}")))?;
        Ok(())
    }

    async fn consume(&self, topic: &str, timeout: Duration) -> Result<Option<String>, CacheError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let popped: Option<(String, String)> = conn
            .blpop(self.key(topic), timeout.as_secs_f64())
            .await
            .map_err(|e| CacheError::Backend(format!("BLPOP failed: {e}")))?;

        Ok(popped.map(|(_, payload)| payload))
    }
}

use std::sync::Arc;
use std::time::Duration;

use tollgate_cache::{QuotaCache, keys};

use crate::RateLimitError;

/// Fixed-window counter per identity, stored in the shared cache
///
/// The first request in a window sets the counter with the window as TTL;
/// later requests rewrite the counter with the remaining TTL so the window
/// never slides. Cache failures let the request through.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    cache: Arc<dyn QuotaCache>,
    endpoint: &'static str,
    limit: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(cache: Arc<dyn QuotaCache>, endpoint: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            cache,
            endpoint,
            limit,
            window,
        }
    }

    /// Count one request for `identity_id`
    pub async fn check(&self, identity_id: u64) -> Result<(), RateLimitError> {
        let key = keys::rate_limit(self.endpoint, identity_id);

        let current = match self.cache.get(&key).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(endpoint = self.endpoint, error = %e, "rate limit cache unavailable, allowing request");
                return Ok(());
            }
        };

        let Some(count) = current.and_then(|value| value.parse::<u32>().ok()) else {
            self.write(&key, 1, self.window).await;
            return Ok(());
        };

        let remaining = self.cache.ttl(&key).await.ok().flatten().filter(|ttl| !ttl.is_zero());

        if count >= self.limit {
            let retry_after = remaining.unwrap_or(self.window).as_secs().max(1);
            tracing::debug!(endpoint = self.endpoint, identity_id, count, retry_after, "rate limit exceeded");
            return Err(RateLimitError::Exceeded {
                limit: self.limit,
                window: self.window,
                retry_after,
            });
        }

        match remaining {
            Some(ttl) => self.write(&key, count + 1, ttl).await,
            // Expired between the read and the TTL lookup
            None => self.write(&key, 1, self.window).await,
        }

        Ok(())
    }

    async fn write(&self, key: &str, count: u32, ttl: Duration) {
        if let Err(e) = self.cache.set_ex(key, &count.to_string(), ttl).await {
            tracing::warn!(endpoint = self.endpoint, error = %e, "failed to store rate limit counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tollgate_cache::{CacheError, MemoryCache};

    use super::*;

    fn limiter(cache: Arc<dyn QuotaCache>) -> FixedWindowLimiter {
        FixedWindowLimiter::new(cache, "billing", 3, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_request_in_window_is_rejected() {
        let limiter = limiter(Arc::new(MemoryCache::new()));

        for _ in 0..3 {
            limiter.check(1).await.unwrap();
        }

        let Err(RateLimitError::Exceeded { limit, retry_after, .. }) = limiter.check(1).await else {
            panic!("expected rejection");
        };
        assert_eq!(limit, 3);
        assert_eq!(retry_after, 60);

        // Other identities have their own window.
        limiter.check(2).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn window_does_not_slide() {
        let limiter = limiter(Arc::new(MemoryCache::new()));

        limiter.check(1).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        limiter.check(1).await.unwrap();
        limiter.check(1).await.unwrap();

        let Err(RateLimitError::Exceeded { retry_after, .. }) = limiter.check(1).await else {
            panic!("expected rejection");
        };
        assert_eq!(retry_after, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn request_after_window_reanchors() {
        let limiter = limiter(Arc::new(MemoryCache::new()));

        for _ in 0..3 {
            limiter.check(1).await.unwrap();
        }
        assert!(limiter.check(1).await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.check(1).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check(1).await.unwrap();
        limiter.check(1).await.unwrap();
        assert!(limiter.check(1).await.is_err());
    }

    struct BrokenCache;

    #[async_trait]
    impl QuotaCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_owned()))
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_owned()))
        }

        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
            Err(CacheError::Backend("connection refused".to_owned()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_owned()))
        }
    }

    #[tokio::test]
    async fn cache_outage_fails_open() {
        let limiter = limiter(Arc::new(BrokenCache));
        for _ in 0..10 {
            limiter.check(1).await.unwrap();
        }
    }
}

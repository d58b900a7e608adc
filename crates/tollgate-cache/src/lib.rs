//! Quota cache and usage work queue
//!
//! A small key/value store with per-key expiry backs credential lookups,
//! rate-limit counters and upstream billing/pricing responses. The same
//! backend carries the usage work queue consumed by the ingestion worker.
//! Redis is used in production; the in-process backend follows the tokio
//! clock so expiry can be driven from tests.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod keys;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tollgate_config::{CacheConfig, CacheStorage};

pub use storage::{
    memory::{MemoryCache, MemoryQueue},
    redis::RedisCache,
};

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis connection or command error
    #[error("cache backend: {0}")]
    Backend(String),
    /// Serialization error
    #[error("serialization: {0}")]
    Serialization(String),
}

/// Key/value store with per-key expiry
#[async_trait]
pub trait QuotaCache: Send + Sync {
    /// Read a value, `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remaining lifetime of a key, `None` when missing or without expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// At-least-once work list
///
/// Items are delivered to one consumer each. An item popped by a consumer
/// that crashes before finishing is lost, so consumers must be idempotent.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a payload to the tail of `topic`
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CacheError>;

    /// Pop the head of `topic`, waiting up to `timeout` for one to arrive
    async fn consume(&self, topic: &str, timeout: Duration) -> Result<Option<String>, CacheError>;
}

/// Cache and queue handles built from one storage backend
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn QuotaCache>,
    pub queue: Arc<dyn WorkQueue>,
}

impl Backends {
    /// Build the configured backend
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        match &config.storage {
            CacheStorage::Memory => Ok(Self::memory()),
            CacheStorage::Redis(redis) => {
                let backend = Arc::new(RedisCache::new(redis.url.as_str(), config.key_prefix.clone())?);
                Ok(Self {
                    cache: backend.clone(),
                    queue: backend,
                })
            }
        }
    }

    /// In-process backend for single-instance deployments and tests
    pub fn memory() -> Self {
        Self {
            cache: Arc::new(MemoryCache::new()),
            queue: Arc::new(MemoryQueue::new()),
        }
    }
}

/// Read and deserialize a JSON value
pub async fn get_json<T: DeserializeOwned>(cache: &dyn QuotaCache, key: &str) -> Result<Option<T>, CacheError> {
    let Some(raw) = cache.get(key).await? else {
        return Ok(None);
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| CacheError::Serialization(format!("deserialize {key}: {e}")))
}

/// Serialize and write a JSON value
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn QuotaCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|e| CacheError::Serialization(format!("serialize {key}: {e}")))?;
    cache.set_ex(key, &raw, ttl).await
}

use serde::Deserialize;
use url::Url;

/// Quota cache and work queue configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Storage backend shared by the cache and the work queue
    #[serde(default)]
    pub storage: CacheStorage,
    /// Prefix prepended to every key, empty by default
    #[serde(default)]
    pub key_prefix: String,
}

/// Cache storage backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStorage {
    /// In-process storage (single instance only)
    #[default]
    Memory,
    /// Redis-backed storage (shared across instances)
    Redis(RedisConfig),
}

/// Redis connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL, e.g. `redis://:password@host:6379/0`
    pub url: Url,
}

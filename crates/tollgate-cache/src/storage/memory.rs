use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{CacheError, QuotaCache, WorkQueue};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache with per-key expiry on the tokio clock
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the entry if it has expired and return whether it is still live
    fn live(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl QuotaCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if !self.live(key) {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        if !self.live(key) {
            return Ok(None);
        }
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// In-process work queue, one FIFO list per topic
#[derive(Default)]
pub struct MemoryQueue {
    topics: Mutex<HashMap<String, VecDeque<String>>>,
    arrived: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items waiting on `topic`
    pub fn len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .map(|topics| topics.get(topic).map_or(0, VecDeque::len))
            .unwrap_or_default()
    }

    /// Whether `topic` has nothing waiting
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn pop(&self, topic: &str) -> Result<Option<String>, CacheError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| CacheError::Backend("queue lock poisoned".to_owned()))?;
        Ok(topics.get_mut(topic).and_then(VecDeque::pop_front))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CacheError> {
        {
            let mut topics = self
                .topics
                .lock()
                .map_err(|_| CacheError::Backend("queue lock poisoned".to_owned()))?;
            topics.entry(topic.to_owned()).or_default().push_back(payload.to_owned());
        }
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn consume(&self, topic: &str, timeout: Duration) -> Result<Option<String>, CacheError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.pop(topic)? {
                return Ok(Some(payload));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{StoreError, UpstreamLog, UpstreamStore, UpstreamToken};

#[derive(Default)]
struct State {
    tokens: BTreeMap<i64, UpstreamToken>,
    logs: Vec<UpstreamLog>,
}

/// Stand-in for the completion service's database
///
/// Reads and writes can be made to fail independently to exercise outage
/// handling.
#[derive(Default)]
pub struct MemoryUpstreamStore {
    state: Mutex<State>,
    reads_failing: AtomicBool,
    writes_failing: AtomicBool,
}

impl MemoryUpstreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_token(&self, token: UpstreamToken) {
        self.state.lock().await.tokens.insert(token.id, token);
    }

    pub async fn token(&self, id: i64) -> Option<UpstreamToken> {
        self.state.lock().await.tokens.get(&id).cloned()
    }

    /// Overwrite a token's quota columns, as the completion service does
    /// when it bills a call
    pub async fn set_token_quota(&self, id: i64, remain_quota: i64, used_quota: i64) {
        if let Some(token) = self.state.lock().await.tokens.get_mut(&id) {
            token.remain_quota = remain_quota;
            token.used_quota = used_quota;
        }
    }

    pub async fn set_token_status(&self, id: i64, status: i32) {
        if let Some(token) = self.state.lock().await.tokens.get_mut(&id) {
            token.status = status;
        }
    }

    pub async fn push_log(&self, log: UpstreamLog) {
        self.state.lock().await.logs.push(log);
    }

    pub fn set_reads_failing(&self, failing: bool) {
        self.reads_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_writes_failing(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("upstream database unreachable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamStore for MemoryUpstreamStore {
    async fn token_by_key(&self, key: &str) -> Result<Option<UpstreamToken>, StoreError> {
        Self::check(&self.reads_failing)?;
        let state = self.state.lock().await;
        Ok(state.tokens.values().find(|t| t.key == key).cloned())
    }

    async fn logs_after(&self, token_id: i64, after_id: i64) -> Result<Vec<UpstreamLog>, StoreError> {
        Self::check(&self.reads_failing)?;
        let state = self.state.lock().await;
        let mut logs: Vec<_> = state
            .logs
            .iter()
            .filter(|l| l.token_id == token_id && l.id > after_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.id);
        Ok(logs)
    }

    async fn add_token_quota(&self, token_id: i64, delta: i64) -> Result<(), StoreError> {
        Self::check(&self.writes_failing)?;
        let mut state = self.state.lock().await;
        let token = state
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| StoreError::NotFound(format!("upstream token {token_id}")))?;
        token.remain_quota += delta;
        Ok(())
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    Identity, IdentitySnapshot, MirrorStore, PendingReconciliation, RedemptionCode, RedemptionLog, StoreError,
    SyncCursor, UsageLog,
};

#[derive(Default)]
struct State {
    next_id: u64,
    identities: BTreeMap<u64, Identity>,
    logs: Vec<UsageLog>,
    codes: HashMap<String, RedemptionCode>,
    redemption_logs: Vec<RedemptionLog>,
    cursors: BTreeMap<i64, SyncCursor>,
    pending: BTreeMap<u64, PendingReconciliation>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Increment the identity's quota and record a marker claimed until
    /// `lease_until`
    fn grant(
        &mut self,
        user_id: u64,
        delta: i64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError> {
        let token_id = self
            .identities
            .get(&user_id)
            .map(|i| i.token_id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {user_id}")))?;

        let marker = PendingReconciliation {
            id: self.next_id(),
            user_id,
            token_id,
            delta,
            attempts: 0,
            last_error: None,
            claimed_until: Some(lease_until),
            created_at: now,
            updated_at: now,
        };

        if let Some(identity) = self.identities.get_mut(&user_id) {
            identity.remain_quota += delta;
        }
        self.pending.insert(marker.id, marker.clone());

        Ok(marker)
    }
}

fn is_due(marker: &PendingReconciliation, now: i64) -> bool {
    marker.claimed_until.is_none_or(|until| until < now)
}

/// Mirror store held in memory
#[derive(Default)]
pub struct MemoryMirrorStore {
    state: Mutex<State>,
    grants_failing: AtomicBool,
}

impl MemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit records written by successful redemptions
    pub async fn redemption_logs(&self) -> Vec<RedemptionLog> {
        self.state.lock().await.redemption_logs.clone()
    }

    pub async fn usage_log_count(&self) -> usize {
        self.state.lock().await.logs.len()
    }

    /// Every unresolved marker, claimed or not
    pub async fn pending_markers(&self) -> Vec<PendingReconciliation> {
        self.state.lock().await.pending.values().cloned().collect()
    }

    /// Make quota grants fail before anything is written
    pub fn set_grants_failing(&self, failing: bool) {
        self.grants_failing.store(failing, Ordering::SeqCst);
    }

    fn check_grants(&self) -> Result<(), StoreError> {
        if self.grants_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("quota grant failed".to_owned()));
        }
        Ok(())
    }

    /// Seed a mirrored log row directly
    pub async fn push_usage_log(&self, mut log: UsageLog) {
        let mut state = self.state.lock().await;
        log.id = state.next_id();
        state.logs.push(log);
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn identity_by_id(&self, id: u64) -> Result<Option<Identity>, StoreError> {
        Ok(self.state.lock().await.identities.get(&id).cloned())
    }

    async fn identity_by_credential(&self, api_key: &str) -> Result<Option<Identity>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.identities.values().find(|i| i.api_key == api_key).cloned())
    }

    async fn identity_by_token(&self, token_id: i64) -> Result<Option<Identity>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.identities.values().find(|i| i.token_id == token_id).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.state.lock().await.identities.values().cloned().collect())
    }

    async fn insert_identity(
        &self,
        api_key: &str,
        snapshot: &IdentitySnapshot,
        now: i64,
    ) -> Result<Identity, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.identities.values().find(|i| i.api_key == api_key) {
            return Ok(existing.clone());
        }

        let identity = Identity {
            id: state.next_id(),
            api_key: api_key.to_owned(),
            token_id: snapshot.token_id,
            remain_quota: snapshot.remain_quota,
            used_quota: snapshot.used_quota,
            expired_time: snapshot.expired_time,
            status: snapshot.status,
            created_at: now,
            updated_at: now,
        };
        state.identities.insert(identity.id, identity.clone());

        Ok(identity)
    }

    async fn replace_identity(&self, id: u64, snapshot: &IdentitySnapshot, now: i64) -> Result<Identity, StoreError> {
        let mut state = self.state.lock().await;
        let identity = state
            .identities
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))?;

        identity.token_id = snapshot.token_id;
        identity.remain_quota = snapshot.remain_quota;
        identity.used_quota = snapshot.used_quota;
        identity.expired_time = snapshot.expired_time;
        identity.status = snapshot.status;
        identity.updated_at = now;

        Ok(identity.clone())
    }

    async fn grant_quota(
        &self,
        user_id: u64,
        delta: i64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError> {
        self.check_grants()?;
        self.state.lock().await.grant(user_id, delta, now, lease_until)
    }

    async fn due_reconciliations(&self, limit: u32, now: i64) -> Result<Vec<PendingReconciliation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .pending
            .values()
            .filter(|m| is_due(m, now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn claim_reconciliation(&self, id: u64, now: i64, lease_until: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.pending.get_mut(&id) {
            Some(marker) if is_due(marker, now) => {
                marker.claimed_until = Some(lease_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_pending_reconciliations(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn resolve_reconciliation(&self, id: u64) -> Result<(), StoreError> {
        self.state.lock().await.pending.remove(&id);
        Ok(())
    }

    async fn record_reconciliation_failure(&self, id: u64, error: &str, now: i64) -> Result<(), StoreError> {
        if let Some(marker) = self.state.lock().await.pending.get_mut(&id) {
            marker.attempts += 1;
            marker.last_error = Some(error.to_owned());
            marker.claimed_until = None;
            marker.updated_at = now;
        }
        Ok(())
    }

    async fn sync_cursor(&self, token_id: i64) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cursors.get(&token_id).map_or(0, |c| c.last_sync_id))
    }

    async fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>, StoreError> {
        Ok(self.state.lock().await.cursors.values().cloned().collect())
    }

    async fn advance_sync_cursor(&self, token_id: i64, last_sync_id: i64, now: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let cursor = state.cursors.entry(token_id).or_insert(SyncCursor {
            token_id,
            last_sync_id: 0,
            updated_at: now,
        });
        cursor.last_sync_id = cursor.last_sync_id.max(last_sync_id);
        cursor.updated_at = now;
        Ok(())
    }

    async fn insert_usage_log(&self, log: &UsageLog) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.logs.iter().any(|l| l.remote_log_id == log.remote_log_id) {
            return Ok(false);
        }

        let mut row = log.clone();
        row.id = state.next_id();
        state.logs.push(row);
        Ok(true)
    }

    async fn usage_logs_by_identity(
        &self,
        user_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<UsageLog>, u64), StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.logs.iter().filter(|l| l.user_id == user_id).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = rows.len() as u64;
        let page = rows
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();

        Ok((page, total))
    }

    async fn delete_usage_logs_before(&self, cutoff: i64) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.logs.len();
        state.logs.retain(|l| l.created_at >= cutoff);
        Ok((before - state.logs.len()) as u64)
    }

    async fn insert_redemption_codes(&self, codes: &[String], quota: i64, now: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        if let Some(duplicate) = codes.iter().find(|code| state.codes.contains_key(*code)) {
            return Err(StoreError::Conflict(format!("redemption code {duplicate} already exists")));
        }

        for code in codes {
            let id = state.next_id();
            state.codes.insert(
                code.clone(),
                RedemptionCode {
                    id,
                    code: code.clone(),
                    quota,
                    used: false,
                    created_at: now,
                    used_at: None,
                    used_by: None,
                },
            );
        }
        Ok(())
    }

    async fn unused_redemption_code(&self, code: &str) -> Result<Option<RedemptionCode>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.codes.get(code).filter(|c| !c.used).cloned())
    }

    async fn redeem_code(
        &self,
        code: &str,
        user_id: u64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError> {
        let mut state = self.state.lock().await;

        let Some(quota) = state.codes.get(code).filter(|c| !c.used).map(|c| c.quota) else {
            return Err(StoreError::Conflict("redemption code is invalid or already used".to_owned()));
        };

        self.check_grants()?;
        let marker = state.grant(user_id, quota, now, lease_until)?;

        if let Some(entry) = state.codes.get_mut(code) {
            entry.used = true;
            entry.used_at = Some(now);
            entry.used_by = Some(user_id);
        }

        let log_id = state.next_id();
        state.redemption_logs.push(RedemptionLog {
            id: log_id,
            user_id,
            code: code.to_owned(),
            quota,
            created_at: now,
        });

        Ok(marker)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn snapshot(token_id: i64, remain_quota: i64) -> IdentitySnapshot {
        IdentitySnapshot {
            token_id,
            remain_quota,
            used_quota: 0,
            expired_time: 0,
            status: 1,
        }
    }

    fn log(user_id: u64, remote_log_id: i64, created_at: i64) -> UsageLog {
        UsageLog {
            id: 0,
            user_id,
            remote_log_id,
            created_at,
            kind: 2,
            content: String::new(),
            username: "alice".to_owned(),
            token_name: "default".to_owned(),
            model_name: "gpt-4o".to_owned(),
            quota: 10,
            prompt_tokens: 1,
            completion_tokens: 1,
            use_time: 1,
            is_stream: false,
            channel: 1,
            channel_name: String::new(),
            token_id: 7,
            group: "default".to_owned(),
            other: String::new(),
            upstream_model_name: "gpt-4o".to_owned(),
        }
    }

    #[tokio::test]
    async fn insert_identity_returns_existing_row() {
        let store = MemoryMirrorStore::new();
        let first = store.insert_identity("abc", &snapshot(7, 100), 10).await.unwrap();
        let second = store.insert_identity("abc", &snapshot(7, 999), 20).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_identities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn grant_quota_records_claimed_marker() {
        let store = MemoryMirrorStore::new();
        let identity = store.insert_identity("abc", &snapshot(7, 100), 10).await.unwrap();

        let marker = store.grant_quota(identity.id, 50, 11, 311).await.unwrap();
        assert_eq!(marker.token_id, 7);
        assert_eq!(marker.delta, 50);
        assert_eq!(marker.claimed_until, Some(311));

        let updated = store.identity_by_id(identity.id).await.unwrap().unwrap();
        assert_eq!(updated.remain_quota, 150);
        assert_eq!(store.pending_markers().await, vec![marker.clone()]);
        assert_eq!(store.count_pending_reconciliations().await.unwrap(), 1);

        // Not due while the granting caller still holds it
        assert!(store.due_reconciliations(10, 311).await.unwrap().is_empty());
        assert_eq!(store.due_reconciliations(10, 312).await.unwrap(), vec![marker]);
    }

    #[tokio::test]
    async fn grant_quota_for_unknown_identity_is_not_found() {
        let store = MemoryMirrorStore::new();
        let result = store.grant_quota(42, 50, 11, 311).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(store.pending_markers().await.is_empty());
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_lapses() {
        let store = MemoryMirrorStore::new();
        let identity = store.insert_identity("abc", &snapshot(7, 100), 10).await.unwrap();
        let marker = store.grant_quota(identity.id, 50, 10, 10).await.unwrap();

        assert!(store.claim_reconciliation(marker.id, 11, 100).await.unwrap());
        assert!(!store.claim_reconciliation(marker.id, 50, 150).await.unwrap());
        assert!(store.claim_reconciliation(marker.id, 101, 200).await.unwrap());

        store.record_reconciliation_failure(marker.id, "boom", 102).await.unwrap();
        let released = store.pending_markers().await;
        assert_eq!(released[0].claimed_until, None);
        assert_eq!(released[0].attempts, 1);
        assert!(store.claim_reconciliation(marker.id, 103, 200).await.unwrap());

        store.resolve_reconciliation(marker.id).await.unwrap();
        assert!(!store.claim_reconciliation(marker.id, 500, 600).await.unwrap());
        assert_eq!(store.count_pending_reconciliations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let store = MemoryMirrorStore::new();
        store.advance_sync_cursor(7, 50, 1).await.unwrap();
        store.advance_sync_cursor(7, 20, 2).await.unwrap();

        assert_eq!(store.sync_cursor(7).await.unwrap(), 50);
        assert_eq!(store.sync_cursor(8).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_remote_log_is_ignored() {
        let store = MemoryMirrorStore::new();
        assert!(store.insert_usage_log(&log(1, 100, 5)).await.unwrap());
        assert!(!store.insert_usage_log(&log(1, 100, 5)).await.unwrap());
        assert_eq!(store.usage_log_count().await, 1);
    }

    #[tokio::test]
    async fn logs_page_newest_first() {
        let store = MemoryMirrorStore::new();
        for (remote, created) in [(1, 10), (2, 30), (3, 20)] {
            store.insert_usage_log(&log(1, remote, created)).await.unwrap();
        }
        store.insert_usage_log(&log(2, 4, 40)).await.unwrap();

        let (page, total) = store.usage_logs_by_identity(1, 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.iter().map(|l| l.remote_log_id).collect::<Vec<_>>(), vec![2, 3]);

        let (page, _) = store.usage_logs_by_identity(1, 2, 2).await.unwrap();
        assert_eq!(page.iter().map(|l| l.remote_log_id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn delete_before_cutoff_keeps_boundary_row() {
        let store = MemoryMirrorStore::new();
        store.insert_usage_log(&log(1, 1, 99)).await.unwrap();
        store.insert_usage_log(&log(1, 2, 100)).await.unwrap();

        assert_eq!(store.delete_usage_logs_before(100).await.unwrap(), 1);
        assert_eq!(store.usage_log_count().await, 1);
    }

    #[tokio::test]
    async fn code_redeems_once_under_contention() {
        let store = Arc::new(MemoryMirrorStore::new());
        store
            .insert_redemption_codes(&["RC-AAAA-BBBB-CCCC".to_owned()], 500_000, 1)
            .await
            .unwrap();

        let mut users = Vec::new();
        for token in 1..=8 {
            let key = format!("key-{token}");
            users.push(store.insert_identity(&key, &snapshot(token, 0), 1).await.unwrap().id);
        }

        let mut handles = Vec::new();
        for user in users {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.redeem_code("RC-AAAA-BBBB-CCCC", user, 2, 302).await
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(marker) => {
                    assert_eq!(marker.delta, 500_000);
                    winners.push(marker.user_id);
                }
                Err(StoreError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(winners.len(), 1);
        let winner = store.identity_by_id(winners[0]).await.unwrap().unwrap();
        assert_eq!(winner.remain_quota, 500_000);
        assert_eq!(store.pending_markers().await.len(), 1);
        assert_eq!(store.redemption_logs().await.len(), 1);
        assert!(store.unused_redemption_code("RC-AAAA-BBBB-CCCC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_grant_leaves_code_unused() {
        let store = MemoryMirrorStore::new();
        store
            .insert_redemption_codes(&["RC-AAAA-BBBB-CCCC".to_owned()], 500, 1)
            .await
            .unwrap();
        let identity = store.insert_identity("abc", &snapshot(7, 100), 1).await.unwrap();

        store.set_grants_failing(true);
        let result = store.redeem_code("RC-AAAA-BBBB-CCCC", identity.id, 2, 302).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let missing = store.redeem_code("RC-AAAA-BBBB-CCCC", 99, 2, 302).await;
        assert!(matches!(missing, Err(StoreError::Unavailable(_))));

        store.set_grants_failing(false);
        let missing = store.redeem_code("RC-AAAA-BBBB-CCCC", 99, 2, 302).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        assert!(store.unused_redemption_code("RC-AAAA-BBBB-CCCC").await.unwrap().is_some());
        assert!(store.redemption_logs().await.is_empty());
        assert!(store.pending_markers().await.is_empty());
        assert_eq!(store.identity_by_id(identity.id).await.unwrap().unwrap().remain_quota, 100);
    }
}

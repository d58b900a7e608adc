//! Mirror and upstream relational stores
//!
//! The mirror store is owned by Tollgate and holds the derived copy of
//! identities and usage logs plus the ledger tables. The upstream store is
//! the completion service's own database and the system of record for
//! quota. Both sit behind traits so the sync engine and ledger can run
//! against in-memory stores in tests.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod memory;
pub mod model;
pub mod mysql;

use async_trait::async_trait;
use thiserror::Error;

pub use model::*;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Driver or connection failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Row expected to exist is missing
    #[error("{0} not found")]
    NotFound(String),

    /// Conditional write lost to a concurrent writer
    #[error("{0}")]
    Conflict(String),
}

/// Locally owned store
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn identity_by_id(&self, id: u64) -> Result<Option<Identity>, StoreError>;

    async fn identity_by_credential(&self, api_key: &str) -> Result<Option<Identity>, StoreError>;

    async fn identity_by_token(&self, token_id: i64) -> Result<Option<Identity>, StoreError>;

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    /// Create the identity for `api_key`, or return the existing row when a
    /// concurrent sync created it first
    async fn insert_identity(
        &self,
        api_key: &str,
        snapshot: &IdentitySnapshot,
        now: i64,
    ) -> Result<Identity, StoreError>;

    /// Overwrite every upstream-owned field and bump `updated_at`
    async fn replace_identity(&self, id: u64, snapshot: &IdentitySnapshot, now: i64) -> Result<Identity, StoreError>;

    /// Increment `remain_quota` and record a pending reconciliation marker
    /// for the same delta, atomically
    ///
    /// The marker is created claimed until `lease_until` so the caller can
    /// apply it upstream without the reconciler racing it.
    async fn grant_quota(
        &self,
        user_id: u64,
        delta: i64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError>;

    /// Oldest-first markers whose claim is absent or lapsed at `now`
    async fn due_reconciliations(&self, limit: u32, now: i64) -> Result<Vec<PendingReconciliation>, StoreError>;

    /// Claim a due marker until `lease_until`; `false` when another worker
    /// holds it or it was already resolved
    async fn claim_reconciliation(&self, id: u64, now: i64, lease_until: i64) -> Result<bool, StoreError>;

    /// Number of unresolved markers, claimed or not
    async fn count_pending_reconciliations(&self) -> Result<u64, StoreError>;

    async fn resolve_reconciliation(&self, id: u64) -> Result<(), StoreError>;

    /// Record a failed attempt and release the claim
    async fn record_reconciliation_failure(&self, id: u64, error: &str, now: i64) -> Result<(), StoreError>;

    /// Last mirrored upstream log id for a token, zero when never synced
    async fn sync_cursor(&self, token_id: i64) -> Result<i64, StoreError>;

    async fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>, StoreError>;

    /// Move the cursor forward; a lower value than the stored one is ignored
    async fn advance_sync_cursor(&self, token_id: i64, last_sync_id: i64, now: i64) -> Result<(), StoreError>;

    /// Insert a mirrored log row; returns `false` when `remote_log_id` was
    /// already mirrored
    async fn insert_usage_log(&self, log: &UsageLog) -> Result<bool, StoreError>;

    /// Newest-first page of an identity's logs and the identity's total count
    async fn usage_logs_by_identity(
        &self,
        user_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<UsageLog>, u64), StoreError>;

    /// Delete logs created strictly before `cutoff`
    async fn delete_usage_logs_before(&self, cutoff: i64) -> Result<u64, StoreError>;

    async fn insert_redemption_codes(&self, codes: &[String], quota: i64, now: i64) -> Result<(), StoreError>;

    async fn unused_redemption_code(&self, code: &str) -> Result<Option<RedemptionCode>, StoreError>;

    /// Mark an unused code as used by `user_id`, grant its quota, record the
    /// reconciliation marker and append the redemption log, in one
    /// transaction
    ///
    /// Fails with `Conflict` when the code is unknown or another caller
    /// redeemed it first, and with `NotFound` when the identity is missing.
    /// Nothing is written on failure.
    async fn redeem_code(
        &self,
        code: &str,
        user_id: u64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError>;
}

/// Upstream system-of-record store
#[async_trait]
pub trait UpstreamStore: Send + Sync {
    async fn token_by_key(&self, key: &str) -> Result<Option<UpstreamToken>, StoreError>;

    /// Logs for a token with id greater than `after_id`, ascending
    async fn logs_after(&self, token_id: i64, after_id: i64) -> Result<Vec<UpstreamLog>, StoreError>;

    /// Atomically add `delta` to the token's `remain_quota`
    async fn add_token_quota(&self, token_id: i64, delta: i64) -> Result<(), StoreError>;
}

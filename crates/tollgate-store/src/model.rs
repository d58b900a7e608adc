//! Row types for the mirror and upstream stores
//!
//! Timestamps are unix seconds. Quota amounts are fixed-point integers,
//! see `tollgate_core::quota`.

use serde::Serialize;

/// Upstream token status meaning "enabled"
pub const STATUS_ACTIVE: i32 = 1;

/// Mirrored billing identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Identity {
    pub id: u64,
    /// Credential without the `sk-` prefix
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Upstream token id
    pub token_id: i64,
    pub remain_quota: i64,
    pub used_quota: i64,
    /// Expiry as unix seconds, zero or negative for never
    pub expired_time: i64,
    pub status: i32,
    pub created_at: i64,
    /// Last time the row was refreshed from upstream
    pub updated_at: i64,
}

impl Identity {
    pub const fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub const fn is_expired(&self, now: i64) -> bool {
        self.expired_time > 0 && self.expired_time < now
    }

    /// Whether the mirrored quota disagrees with an upstream snapshot
    pub const fn quota_differs(&self, snapshot: &IdentitySnapshot) -> bool {
        self.remain_quota != snapshot.remain_quota || self.used_quota != snapshot.used_quota
    }
}

/// Upstream-owned fields copied onto an identity on every sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub token_id: i64,
    pub remain_quota: i64,
    pub used_quota: i64,
    pub expired_time: i64,
    pub status: i32,
}

impl From<&UpstreamToken> for IdentitySnapshot {
    fn from(token: &UpstreamToken) -> Self {
        Self {
            token_id: token.id,
            remain_quota: token.remain_quota,
            used_quota: token.used_quota,
            expired_time: token.expired_time,
            status: token.status,
        }
    }
}

/// Mirrored upstream usage log row
///
/// `id` is assigned by the mirror store on insert and ignored otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UsageLog {
    pub id: u64,
    pub user_id: u64,
    /// Upstream log id, unique across the mirror
    pub remote_log_id: i64,
    pub created_at: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: i32,
    pub content: String,
    #[serde(skip_serializing)]
    pub username: String,
    #[serde(skip_serializing)]
    pub token_name: String,
    pub model_name: String,
    pub quota: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub use_time: i64,
    pub is_stream: bool,
    pub channel: i64,
    pub channel_name: String,
    pub token_id: i64,
    pub group: String,
    pub other: String,
    /// Concrete model that served the call
    pub upstream_model_name: String,
}

/// One-time quota voucher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RedemptionCode {
    pub id: u64,
    pub code: String,
    pub quota: i64,
    pub used: bool,
    pub created_at: i64,
    pub used_at: Option<i64>,
    pub used_by: Option<u64>,
}

/// Append-only audit record of a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RedemptionLog {
    pub id: u64,
    pub user_id: u64,
    pub code: String,
    pub quota: i64,
    pub created_at: i64,
}

/// Per-token watermark of mirrored upstream log ids
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SyncCursor {
    pub token_id: i64,
    pub last_sync_id: i64,
    pub updated_at: i64,
}

/// Quota delta applied locally but not yet confirmed upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PendingReconciliation {
    pub id: u64,
    pub user_id: u64,
    pub token_id: i64,
    pub delta: i64,
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Worker lease; unclaimed when `None` or in the past
    pub claimed_until: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Upstream credential row (`tokens`)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UpstreamToken {
    pub id: i64,
    pub key: String,
    pub status: i32,
    pub name: String,
    pub expired_time: i64,
    pub remain_quota: i64,
    pub used_quota: i64,
}

/// Upstream usage log row (`logs`)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UpstreamLog {
    pub id: i64,
    pub user_id: i64,
    pub created_at: i64,
    #[sqlx(rename = "type")]
    pub kind: i32,
    pub content: String,
    pub username: String,
    pub token_name: String,
    pub model_name: String,
    pub quota: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub use_time: i64,
    pub is_stream: bool,
    pub channel: i64,
    pub channel_name: String,
    pub token_id: i64,
    pub group: String,
    pub other: String,
}

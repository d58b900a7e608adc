use async_trait::async_trait;
use sqlx::{MySqlConnection, MySqlPool};

use crate::{
    Identity, IdentitySnapshot, MirrorStore, PendingReconciliation, RedemptionCode, StoreError, SyncCursor, UsageLog,
};

const IDENTITY_COLUMNS: &str =
    "id, api_key, token_id, remain_quota, used_quota, expired_time, status, created_at, updated_at";

const LOG_COLUMNS: &str = "id, user_id, remote_log_id, created_at, type, content, username, token_name, model_name, \
     quota, prompt_tokens, completion_tokens, use_time, is_stream, channel, channel_name, token_id, `group`, other, \
     upstream_model_name";

const PENDING_COLUMNS: &str =
    "id, user_id, token_id, delta, attempts, last_error, claimed_until, created_at, updated_at";

const CODE_TAKEN: &str = "redemption code is invalid or already used";

/// Mirror store on the locally owned MySQL database
#[derive(Clone)]
pub struct MySqlMirrorStore {
    pool: MySqlPool,
}

impl MySqlMirrorStore {
    pub const fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create missing tables
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        super::schema::bootstrap(&self.pool).await
    }

    async fn fetch_identity(&self, filter: &str, value: impl ToString + Send) -> Result<Option<Identity>, StoreError> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE {filter} = ? LIMIT 1");
        let identity = sqlx::query_as::<_, Identity>(&sql)
            .bind(value.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(identity)
    }
}

/// Increment the identity's quota and insert a claimed marker on `conn`
///
/// The caller owns the transaction.
async fn grant_in(
    conn: &mut MySqlConnection,
    user_id: u64,
    delta: i64,
    now: i64,
    lease_until: i64,
) -> Result<PendingReconciliation, StoreError> {
    let token_id: Option<i64> = sqlx::query_scalar("SELECT token_id FROM users WHERE id = ? FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(token_id) = token_id else {
        return Err(StoreError::NotFound(format!("identity {user_id}")));
    };

    sqlx::query("UPDATE users SET remain_quota = remain_quota + ? WHERE id = ?")
        .bind(delta)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let marker_id = sqlx::query(
        "INSERT INTO pending_reconciliations (user_id, token_id, delta, attempts, claimed_until, created_at, updated_at)
         VALUES (?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token_id)
    .bind(delta)
    .bind(lease_until)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_id();

    Ok(PendingReconciliation {
        id: marker_id,
        user_id,
        token_id,
        delta,
        attempts: 0,
        last_error: None,
        claimed_until: Some(lease_until),
        created_at: now,
        updated_at: now,
    })
}

#[async_trait]
impl MirrorStore for MySqlMirrorStore {
    async fn identity_by_id(&self, id: u64) -> Result<Option<Identity>, StoreError> {
        self.fetch_identity("id", id).await
    }

    async fn identity_by_credential(&self, api_key: &str) -> Result<Option<Identity>, StoreError> {
        self.fetch_identity("api_key", api_key).await
    }

    async fn identity_by_token(&self, token_id: i64) -> Result<Option<Identity>, StoreError> {
        self.fetch_identity("token_id", token_id).await
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let sql = format!("SELECT {IDENTITY_COLUMNS} FROM users ORDER BY id");
        let identities = sqlx::query_as::<_, Identity>(&sql).fetch_all(&self.pool).await?;
        Ok(identities)
    }

    async fn insert_identity(
        &self,
        api_key: &str,
        snapshot: &IdentitySnapshot,
        now: i64,
    ) -> Result<Identity, StoreError> {
        sqlx::query(
            "INSERT INTO users (api_key, token_id, remain_quota, used_quota, expired_time, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE id = id",
        )
        .bind(api_key)
        .bind(snapshot.token_id)
        .bind(snapshot.remain_quota)
        .bind(snapshot.used_quota)
        .bind(snapshot.expired_time)
        .bind(snapshot.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.identity_by_credential(api_key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("identity for token {}", snapshot.token_id)))
    }

    async fn replace_identity(&self, id: u64, snapshot: &IdentitySnapshot, now: i64) -> Result<Identity, StoreError> {
        let result = sqlx::query(
            "UPDATE users
             SET token_id = ?, remain_quota = ?, used_quota = ?, expired_time = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(snapshot.token_id)
        .bind(snapshot.remain_quota)
        .bind(snapshot.used_quota)
        .bind(snapshot.expired_time)
        .bind(snapshot.status)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("identity {id}")));
        }

        self.identity_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))
    }

    async fn grant_quota(
        &self,
        user_id: u64,
        delta: i64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError> {
        let mut tx = self.pool.begin().await?;
        let marker = grant_in(&mut tx, user_id, delta, now, lease_until).await?;
        tx.commit().await?;
        Ok(marker)
    }

    async fn due_reconciliations(&self, limit: u32, now: i64) -> Result<Vec<PendingReconciliation>, StoreError> {
        let sql = format!(
            "SELECT {PENDING_COLUMNS} FROM pending_reconciliations
             WHERE claimed_until IS NULL OR claimed_until < ?
             ORDER BY id LIMIT ?"
        );
        let due = sqlx::query_as::<_, PendingReconciliation>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(due)
    }

    async fn claim_reconciliation(&self, id: u64, now: i64, lease_until: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE pending_reconciliations SET claimed_until = ?
             WHERE id = ? AND (claimed_until IS NULL OR claimed_until < ?)",
        )
        .bind(lease_until)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_pending_reconciliations(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_reconciliations")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn resolve_reconciliation(&self, id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_reconciliations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_reconciliation_failure(&self, id: u64, error: &str, now: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE pending_reconciliations
             SET attempts = attempts + 1, last_error = ?, claimed_until = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync_cursor(&self, token_id: i64) -> Result<i64, StoreError> {
        let cursor: Option<i64> = sqlx::query_scalar("SELECT last_sync_id FROM sync_states WHERE token_id = ?")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cursor.unwrap_or(0))
    }

    async fn list_sync_cursors(&self) -> Result<Vec<SyncCursor>, StoreError> {
        let cursors = sqlx::query_as::<_, SyncCursor>("SELECT token_id, last_sync_id, updated_at FROM sync_states")
            .fetch_all(&self.pool)
            .await?;
        Ok(cursors)
    }

    async fn advance_sync_cursor(&self, token_id: i64, last_sync_id: i64, now: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_states (token_id, last_sync_id, updated_at) VALUES (?, ?, ?)
             ON DUPLICATE KEY UPDATE
                 last_sync_id = GREATEST(last_sync_id, VALUES(last_sync_id)),
                 updated_at = VALUES(updated_at)",
        )
        .bind(token_id)
        .bind(last_sync_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_usage_log(&self, log: &UsageLog) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT IGNORE INTO logs (user_id, remote_log_id, created_at, type, content, username, token_name,
                 model_name, quota, prompt_tokens, completion_tokens, use_time, is_stream, channel, channel_name,
                 token_id, `group`, other, upstream_model_name)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.user_id)
        .bind(log.remote_log_id)
        .bind(log.created_at)
        .bind(log.kind)
        .bind(&log.content)
        .bind(&log.username)
        .bind(&log.token_name)
        .bind(&log.model_name)
        .bind(log.quota)
        .bind(log.prompt_tokens)
        .bind(log.completion_tokens)
        .bind(log.use_time)
        .bind(log.is_stream)
        .bind(log.channel)
        .bind(&log.channel_name)
        .bind(log.token_id)
        .bind(&log.group)
        .bind(&log.other)
        .bind(&log.upstream_model_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn usage_logs_by_identity(
        &self,
        user_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<UsageLog>, u64), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
        let rows = sqlx::query_as::<_, UsageLog>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, u64::try_from(total).unwrap_or_default()))
    }

    async fn delete_usage_logs_before(&self, cutoff: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_redemption_codes(&self, codes: &[String], quota: i64, now: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for code in codes {
            sqlx::query("INSERT INTO redemption_codes (code, quota, used, created_at) VALUES (?, ?, FALSE, ?)")
                .bind(code)
                .bind(quota)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn unused_redemption_code(&self, code: &str) -> Result<Option<RedemptionCode>, StoreError> {
        let row = sqlx::query_as::<_, RedemptionCode>(
            "SELECT id, code, quota, used, created_at, used_at, used_by
             FROM redemption_codes WHERE code = ? AND used = FALSE",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn redeem_code(
        &self,
        code: &str,
        user_id: u64,
        now: i64,
        lease_until: i64,
    ) -> Result<PendingReconciliation, StoreError> {
        let mut tx = self.pool.begin().await?;

        let quota: Option<i64> =
            sqlx::query_scalar("SELECT quota FROM redemption_codes WHERE code = ? AND used = FALSE FOR UPDATE")
                .bind(code)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(quota) = quota else {
            return Err(StoreError::Conflict(CODE_TAKEN.to_owned()));
        };

        let claimed = sqlx::query(
            "UPDATE redemption_codes SET used = TRUE, used_at = ?, used_by = ? WHERE code = ? AND used = FALSE",
        )
        .bind(now)
        .bind(user_id)
        .bind(code)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Err(StoreError::Conflict(CODE_TAKEN.to_owned()));
        }

        // Dropping `tx` on any error below rolls the code back to unused
        let marker = grant_in(&mut tx, user_id, quota, now, lease_until).await?;

        sqlx::query("INSERT INTO redemption_logs (user_id, code, quota, created_at) VALUES (?, ?, ?, ?)")
            .bind(user_id)
            .bind(code)
            .bind(quota)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(marker)
    }
}

use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::{StoreError, UpstreamLog, UpstreamStore, UpstreamToken};

// Upstream ids are unsigned; cast so they decode as i64.
const TOKEN_COLUMNS: &str = "CAST(id AS SIGNED) AS id, `key`, status, COALESCE(name, '') AS name, \
     COALESCE(expired_time, 0) AS expired_time, COALESCE(remain_quota, 0) AS remain_quota, \
     COALESCE(used_quota, 0) AS used_quota";

const LOG_COLUMNS: &str = "CAST(id AS SIGNED) AS id, CAST(user_id AS SIGNED) AS user_id, created_at, type, \
     COALESCE(content, '') AS content, COALESCE(username, '') AS username, \
     COALESCE(token_name, '') AS token_name, COALESCE(model_name, '') AS model_name, \
     COALESCE(quota, 0) AS quota, CAST(COALESCE(prompt_tokens, 0) AS SIGNED) AS prompt_tokens, \
     CAST(COALESCE(completion_tokens, 0) AS SIGNED) AS completion_tokens, \
     CAST(COALESCE(use_time, 0) AS SIGNED) AS use_time, COALESCE(is_stream, FALSE) AS is_stream, \
     CAST(COALESCE(channel, 0) AS SIGNED) AS channel, COALESCE(channel_name, '') AS channel_name, \
     CAST(COALESCE(token_id, 0) AS SIGNED) AS token_id, COALESCE(`group`, '') AS `group`, \
     COALESCE(other, '') AS other";

/// Read/write access to the completion service's own database
///
/// Only token quota is ever written here.
#[derive(Clone)]
pub struct MySqlUpstreamStore {
    pool: MySqlPool,
}

impl MySqlUpstreamStore {
    pub const fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UpstreamStore for MySqlUpstreamStore {
    async fn token_by_key(&self, key: &str) -> Result<Option<UpstreamToken>, StoreError> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE `key` = ? LIMIT 1");
        let token = sqlx::query_as::<_, UpstreamToken>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }

    async fn logs_after(&self, token_id: i64, after_id: i64) -> Result<Vec<UpstreamLog>, StoreError> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE token_id = ? AND id > ? ORDER BY id ASC");
        let logs = sqlx::query_as::<_, UpstreamLog>(&sql)
            .bind(token_id)
            .bind(after_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    async fn add_token_quota(&self, token_id: i64, delta: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tokens SET remain_quota = remain_quota + ? WHERE id = ?")
            .bind(delta)
            .bind(token_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("upstream token {token_id}")));
        }

        tracing::debug!(token_id, delta, "upstream quota adjusted");
        Ok(())
    }
}

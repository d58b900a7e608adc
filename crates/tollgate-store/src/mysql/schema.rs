use sqlx::MySqlPool;

use crate::StoreError;

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        api_key VARCHAR(128) NOT NULL,
        token_id BIGINT NOT NULL,
        remain_quota BIGINT NOT NULL DEFAULT 0,
        used_quota BIGINT NOT NULL DEFAULT 0,
        expired_time BIGINT NOT NULL DEFAULT 0,
        status INT NOT NULL DEFAULT 1,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        UNIQUE KEY idx_users_api_key (api_key),
        KEY idx_users_token_id (token_id)
    )",
    "CREATE TABLE IF NOT EXISTS logs (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        user_id BIGINT UNSIGNED NOT NULL,
        remote_log_id BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        type INT NOT NULL DEFAULT 0,
        content TEXT NOT NULL,
        username VARCHAR(255) NOT NULL DEFAULT '',
        token_name VARCHAR(255) NOT NULL DEFAULT '',
        model_name VARCHAR(255) NOT NULL DEFAULT '',
        quota BIGINT NOT NULL DEFAULT 0,
        prompt_tokens BIGINT NOT NULL DEFAULT 0,
        completion_tokens BIGINT NOT NULL DEFAULT 0,
        use_time BIGINT NOT NULL DEFAULT 0,
        is_stream BOOLEAN NOT NULL DEFAULT FALSE,
        channel BIGINT NOT NULL DEFAULT 0,
        channel_name VARCHAR(255) NOT NULL DEFAULT '',
        token_id BIGINT NOT NULL DEFAULT 0,
        `group` VARCHAR(64) NOT NULL DEFAULT '',
        other TEXT NOT NULL,
        upstream_model_name VARCHAR(255) NOT NULL DEFAULT '',
        UNIQUE KEY idx_logs_remote_log_id (remote_log_id),
        KEY idx_logs_user_created (user_id, created_at),
        KEY idx_logs_created_at (created_at)
    )",
    "CREATE TABLE IF NOT EXISTS redemption_codes (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        code VARCHAR(64) NOT NULL,
        quota BIGINT NOT NULL,
        used BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL,
        used_at BIGINT NULL,
        used_by BIGINT UNSIGNED NULL,
        UNIQUE KEY idx_redemption_codes_code (code)
    )",
    "CREATE TABLE IF NOT EXISTS redemption_logs (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        user_id BIGINT UNSIGNED NOT NULL,
        code VARCHAR(64) NOT NULL,
        quota BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        KEY idx_redemption_logs_user (user_id)
    )",
    "CREATE TABLE IF NOT EXISTS sync_states (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        token_id BIGINT NOT NULL,
        last_sync_id BIGINT NOT NULL DEFAULT 0,
        updated_at BIGINT NOT NULL,
        UNIQUE KEY idx_sync_states_token (token_id)
    )",
    "CREATE TABLE IF NOT EXISTS pending_reconciliations (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        user_id BIGINT UNSIGNED NOT NULL,
        token_id BIGINT NOT NULL,
        delta BIGINT NOT NULL,
        attempts INT NOT NULL DEFAULT 0,
        last_error TEXT NULL,
        claimed_until BIGINT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        KEY idx_pending_claimed (claimed_until)
    )",
];

/// Columns added after a table's first release, as (table, column, DDL)
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[(
    "pending_reconciliations",
    "claimed_until",
    "ALTER TABLE pending_reconciliations ADD COLUMN claimed_until BIGINT NULL, ADD KEY idx_pending_claimed (claimed_until)",
)];

/// Create missing mirror tables
pub async fn bootstrap(pool: &MySqlPool) -> Result<(), StoreError> {
    for statement in TABLES {
        sqlx::query(statement).execute(pool).await?;
    }

    for &(table, column, ddl) in ADDED_COLUMNS {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.COLUMNS
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
        )
        .bind(table)
        .bind(column)
        .fetch_one(pool)
        .await?;

        if present == 0 {
            sqlx::query(ddl).execute(pool).await?;
            tracing::info!(table, column, "mirror column added");
        }
    }

    tracing::info!(tables = TABLES.len(), "mirror schema ready");
    Ok(())
}

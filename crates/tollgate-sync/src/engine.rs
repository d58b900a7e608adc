use std::sync::Arc;

use tollgate_core::now_unix;
use tollgate_store::{Identity, IdentitySnapshot, MirrorStore, UpstreamLog, UpstreamStore, UsageLog};
use tollgate_telemetry::Metrics;

use crate::{SyncError, SyncReport};

/// Copies upstream tokens and usage logs into the mirror store
#[derive(Clone)]
pub struct SyncEngine {
    mirror: Arc<dyn MirrorStore>,
    upstream: Arc<dyn UpstreamStore>,
    metrics: Metrics,
}

impl SyncEngine {
    pub fn new(mirror: Arc<dyn MirrorStore>, upstream: Arc<dyn UpstreamStore>, metrics: Metrics) -> Self {
        Self {
            mirror,
            upstream,
            metrics,
        }
    }

    pub fn mirror(&self) -> &Arc<dyn MirrorStore> {
        &self.mirror
    }

    /// Bring the mirrored identity for `api_key` in line with its upstream
    /// token, creating it on first sight
    ///
    /// An existing row is only rewritten when its quota has drifted.
    pub async fn sync_identity(&self, api_key: &str) -> Result<Identity, SyncError> {
        let token = self
            .upstream
            .token_by_key(api_key)
            .await?
            .ok_or(SyncError::UpstreamNotFound)?;
        let snapshot = IdentitySnapshot::from(&token);
        let now = now_unix();

        let Some(identity) = self.mirror.identity_by_credential(api_key).await? else {
            let identity = self.mirror.insert_identity(api_key, &snapshot, now).await?;
            tracing::info!(identity_id = identity.id, token_id = token.id, "identity mirrored");
            return Ok(identity);
        };

        if !identity.quota_differs(&snapshot) {
            return Ok(identity);
        }

        let updated = self.mirror.replace_identity(identity.id, &snapshot, now).await?;
        tracing::debug!(
            identity_id = updated.id,
            remain_quota = updated.remain_quota,
            used_quota = updated.used_quota,
            "identity quota refreshed"
        );

        Ok(updated)
    }

    /// Mirror every upstream log for `token_id` newer than `since`
    ///
    /// Returns how many rows the upstream yielded. Rows already mirrored are
    /// skipped, so replaying from an older cursor is harmless.
    pub async fn sync_logs(&self, token_id: i64, since: i64) -> Result<usize, SyncError> {
        let logs = self.upstream.logs_after(token_id, since).await?;
        let Some(last_id) = logs.last().map(|log| log.id) else {
            return Ok(0);
        };

        let identity = self
            .mirror
            .identity_by_token(token_id)
            .await?
            .ok_or(SyncError::IdentityNotMirrored(token_id))?;

        let mut inserted = 0_u64;
        for log in &logs {
            if self.mirror.insert_usage_log(&mirror_row(identity.id, log)).await? {
                inserted += 1;
            }
        }

        self.mirror.advance_sync_cursor(token_id, last_id, now_unix()).await?;
        self.metrics.rows_mirrored(inserted);

        tracing::debug!(token_id, fetched = logs.len(), inserted, last_id, "usage logs mirrored");
        Ok(logs.len())
    }

    /// Re-sync every mirrored identity from upstream
    pub async fn sync_all_identities(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        for identity in self.mirror.list_identities().await? {
            let result = self.sync_identity(&identity.api_key).await;
            if let Err(e) = &result {
                tracing::warn!(identity_id = identity.id, error = %e, "identity sync failed");
            }
            report.record(&result);
        }

        tracing::info!(total = report.total, failed = report.failed, "identity sync finished");
        Ok(report)
    }

    /// Pull new logs for every mirrored identity from its stored cursor
    pub async fn sync_all_logs(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        let cursors: std::collections::HashMap<i64, i64> = self
            .mirror
            .list_sync_cursors()
            .await?
            .into_iter()
            .map(|cursor| (cursor.token_id, cursor.last_sync_id))
            .collect();

        for identity in self.mirror.list_identities().await? {
            let since = cursors.get(&identity.token_id).copied().unwrap_or(0);
            let result = self.sync_logs(identity.token_id, since).await;
            if let Err(e) = &result {
                tracing::warn!(token_id = identity.token_id, error = %e, "log sync failed");
            }
            report.record(&result);
        }

        tracing::info!(total = report.total, failed = report.failed, "log sync finished");
        Ok(report)
    }
}

fn mirror_row(user_id: u64, log: &UpstreamLog) -> UsageLog {
    UsageLog {
        id: 0,
        user_id,
        remote_log_id: log.id,
        created_at: log.created_at,
        kind: log.kind,
        content: log.content.clone(),
        username: log.username.clone(),
        token_name: log.token_name.clone(),
        model_name: log.model_name.clone(),
        quota: log.quota,
        prompt_tokens: log.prompt_tokens,
        completion_tokens: log.completion_tokens,
        use_time: log.use_time,
        is_stream: log.is_stream,
        channel: log.channel,
        channel_name: log.channel_name.clone(),
        token_id: log.token_id,
        group: log.group.clone(),
        other: log.other.clone(),
        upstream_model_name: upstream_model_name(log),
    }
}

/// Concrete model recorded in the log's `other` metadata, else the billed
/// model name
fn upstream_model_name(log: &UpstreamLog) -> String {
    serde_json::from_str::<serde_json::Value>(&log.other)
        .ok()
        .and_then(|other| {
            other
                .get("upstream_model_name")
                .and_then(serde_json::Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| log.model_name.clone())
}

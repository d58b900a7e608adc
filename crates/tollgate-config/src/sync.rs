use serde::Deserialize;

/// Background synchronization, ingestion and maintenance jobs
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Full identity sync interval
    #[serde(default = "default_users_interval")]
    pub users_interval: String,
    /// Full log sync interval
    #[serde(default = "default_logs_interval")]
    pub logs_interval: String,
    /// Model availability refresh interval
    #[serde(default = "default_model_status_interval")]
    pub model_status_interval: String,
    /// Pending quota reconciliation interval
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: String,
    /// Local hour (0-23, UTC) at which old logs are purged
    #[serde(default = "default_cleanup_at_hour")]
    pub cleanup_at_hour: u8,
    /// Mirror log retention in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Blocking pop timeout for the ingestion worker
    #[serde(default = "default_worker_poll_timeout")]
    pub worker_poll_timeout: String,
    /// Number of ingestion workers
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            users_interval: default_users_interval(),
            logs_interval: default_logs_interval(),
            model_status_interval: default_model_status_interval(),
            reconcile_interval: default_reconcile_interval(),
            cleanup_at_hour: default_cleanup_at_hour(),
            retention_days: default_retention_days(),
            worker_poll_timeout: default_worker_poll_timeout(),
            workers: default_workers(),
        }
    }
}

fn default_users_interval() -> String {
    "10m".to_owned()
}

fn default_logs_interval() -> String {
    "5m".to_owned()
}

fn default_model_status_interval() -> String {
    "5m".to_owned()
}

fn default_reconcile_interval() -> String {
    "1m".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_cleanup_at_hour() -> u8 {
    3
}

#[allow(clippy::missing_const_for_fn)]
fn default_retention_days() -> u32 {
    30
}

fn default_worker_poll_timeout() -> String {
    "5s".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_workers() -> usize {
    1
}

use std::sync::Arc;

use serde::Serialize;
use tollgate_core::now_unix;
use tollgate_store::{MirrorStore, UsageLog};

use crate::LedgerError;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;
const SECONDS_PER_DAY: i64 = 86_400;

/// Normalized pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    /// Page is at least 1; a page size outside `1..=100` becomes 20
    pub fn new(page: Option<u64>, page_size: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
                .unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    const fn offset(self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// One page of an identity's usage logs
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub data: Vec<UsageLog>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub current_page: u64,
    pub page_size: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// Queries and retention for mirrored usage logs
#[derive(Clone)]
pub struct LogService {
    mirror: Arc<dyn MirrorStore>,
    retention_days: u32,
}

impl LogService {
    pub fn new(mirror: Arc<dyn MirrorStore>, retention_days: u32) -> Self {
        Self { mirror, retention_days }
    }

    /// Newest-first page of the identity's logs
    pub async fn get_logs_by_identity(&self, identity_id: u64, request: PageRequest) -> Result<LogPage, LedgerError> {
        let (data, total) = self
            .mirror
            .usage_logs_by_identity(identity_id, request.offset(), request.page_size)
            .await?;

        Ok(LogPage {
            data,
            meta: PageMeta {
                current_page: request.page,
                page_size: request.page_size,
                total,
                total_pages: total.div_ceil(request.page_size),
            },
        })
    }

    /// Delete mirrored logs older than the retention window
    pub async fn cleanup_old_logs(&self) -> Result<u64, LedgerError> {
        self.cleanup_before(now_unix()).await
    }

    /// Delete logs created before `now` minus the retention window; a row
    /// exactly at the cutoff is kept
    pub async fn cleanup_before(&self, now: i64) -> Result<u64, LedgerError> {
        let cutoff = now - i64::from(self.retention_days) * SECONDS_PER_DAY;
        let deleted = self.mirror.delete_usage_logs_before(cutoff).await?;

        tracing::info!(deleted, cutoff, retention_days = self.retention_days, "old usage logs removed");
        Ok(deleted)
    }
}

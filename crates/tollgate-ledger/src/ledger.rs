use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tollgate_core::now_unix;
use tollgate_store::{Identity, MirrorStore, PendingReconciliation, UpstreamStore};
use tollgate_telemetry::Metrics;

use crate::LedgerError;

/// Markers retried per reconciliation pass
const RECONCILE_BATCH: u32 = 100;

/// How long a worker holds a marker while applying it upstream
pub(crate) const CLAIM_LEASE_SECS: i64 = 300;

/// Result of a quota grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaGrant {
    /// Mirrored identity after the grant
    pub identity: Identity,
    /// Whether the upstream increment has been applied
    pub reconciled: bool,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
    /// Markers still unresolved after the pass, across all batches
    pub pending: u64,
}

/// Applies quota grants to the mirror and the upstream store
#[derive(Clone)]
pub struct QuotaLedger {
    mirror: Arc<dyn MirrorStore>,
    upstream: Arc<dyn UpstreamStore>,
    metrics: Metrics,
}

impl QuotaLedger {
    pub fn new(mirror: Arc<dyn MirrorStore>, upstream: Arc<dyn UpstreamStore>, metrics: Metrics) -> Self {
        Self {
            mirror,
            upstream,
            metrics,
        }
    }

    /// Grant `delta` quota to an identity
    ///
    /// The local grant always commits first together with a pending marker,
    /// claimed by this call so the reconciler leaves it alone. An upstream
    /// failure releases the marker for the reconciler and the grant is
    /// reported with `reconciled: false`; the local write is never rolled
    /// back.
    pub async fn add_quota(&self, identity_id: u64, delta: i64) -> Result<QuotaGrant, LedgerError> {
        if delta < 1 {
            return Err(LedgerError::InvalidInput("quota must be at least 1".to_owned()));
        }

        let now = now_unix();
        let marker = self
            .mirror
            .grant_quota(identity_id, delta, now, now + CLAIM_LEASE_SECS)
            .await?;
        let reconciled = self.apply(&marker).await;

        let identity = self
            .mirror
            .identity_by_id(identity_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("identity {identity_id}")))?;

        tracing::info!(
            identity_id,
            token_id = marker.token_id,
            delta,
            reconciled,
            remain_quota = identity.remain_quota,
            "quota granted"
        );

        Ok(QuotaGrant { identity, reconciled })
    }

    /// Retry the upstream increment for every due marker, oldest first
    ///
    /// Each marker is claimed before it is applied; markers held by another
    /// worker are skipped.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, LedgerError> {
        let now = now_unix();
        let markers = self.mirror.due_reconciliations(RECONCILE_BATCH, now).await?;
        let mut report = ReconcileReport::default();

        for marker in &markers {
            if !self
                .mirror
                .claim_reconciliation(marker.id, now, now + CLAIM_LEASE_SECS)
                .await?
            {
                tracing::debug!(marker_id = marker.id, "marker held by another worker");
                continue;
            }

            report.attempted += 1;
            if self.apply(marker).await {
                report.applied += 1;
            } else {
                report.failed += 1;
            }
        }

        report.pending = self.mirror.count_pending_reconciliations().await?;
        self.metrics.reconciliation_pending(report.pending);

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                applied = report.applied,
                failed = report.failed,
                pending = report.pending,
                "reconciliation pass finished"
            );
        }

        Ok(report)
    }

    /// Run [`Self::reconcile_pending`] every `interval` until `shutdown`
    pub fn spawn_reconciler(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.reconcile_pending().await {
                    tracing::error!(error = %e, "reconciliation pass failed");
                }
            }

            tracing::debug!("reconciler stopped");
        })
    }

    /// Push one claimed marker's delta upstream and clear it; returns
    /// whether the upstream write succeeded
    ///
    /// A crash between the upstream write and the marker delete replays the
    /// delta once the claim lapses.
    pub(crate) async fn apply(&self, marker: &PendingReconciliation) -> bool {
        match self.upstream.add_token_quota(marker.token_id, marker.delta).await {
            Ok(()) => {
                if let Err(e) = self.mirror.resolve_reconciliation(marker.id).await {
                    tracing::error!(
                        marker_id = marker.id,
                        token_id = marker.token_id,
                        error = %e,
                        "upstream quota applied but marker not cleared"
                    );
                }
                true
            }
            Err(e) => {
                tracing::warn!(
                    marker_id = marker.id,
                    token_id = marker.token_id,
                    delta = marker.delta,
                    attempts = marker.attempts + 1,
                    error = %e,
                    "upstream quota increment failed"
                );

                if let Err(e) = self
                    .mirror
                    .record_reconciliation_failure(marker.id, &e.to_string(), now_unix())
                    .await
                {
                    tracing::error!(marker_id = marker.id, error = %e, "failed to record reconciliation attempt");
                }
                false
            }
        }
    }
}

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use tollgate_core::now_unix;
use tollgate_store::MirrorStore;

use crate::ledger::CLAIM_LEASE_SECS;
use crate::{LedgerError, QuotaLedger};

const MAX_BATCH: usize = 1000;

/// Random bytes per code; encodes to 16 base64 characters
const CODE_ENTROPY: usize = 12;

/// Result of redeeming a code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redemption {
    pub quota: i64,
    /// Whether the grant has reached the upstream store
    pub reconciled: bool,
}

/// Issues and redeems one-time quota vouchers
#[derive(Clone)]
pub struct RedemptionService {
    mirror: Arc<dyn MirrorStore>,
    ledger: QuotaLedger,
}

impl RedemptionService {
    pub fn new(mirror: Arc<dyn MirrorStore>, ledger: QuotaLedger) -> Self {
        Self { mirror, ledger }
    }

    /// Create `count` unused codes worth `quota` each
    ///
    /// Codes look like `RC-XXXX-XXXX-…`, seeded with the batch label
    /// (default `B<unix seconds>`).
    pub async fn generate_codes(
        &self,
        count: usize,
        quota: i64,
        batch_label: Option<&str>,
    ) -> Result<Vec<String>, LedgerError> {
        if !(1..=MAX_BATCH).contains(&count) {
            return Err(LedgerError::InvalidInput(format!(
                "count must be between 1 and {MAX_BATCH}"
            )));
        }
        if quota < 1 {
            return Err(LedgerError::InvalidInput("quota must be at least 1".to_owned()));
        }

        let now = now_unix();
        let label = batch_label
            .filter(|label| !label.is_empty())
            .map_or_else(|| format!("B{now}"), str::to_owned);

        let codes: Vec<String> = {
            let mut rng = rand::rng();
            (0..count)
                .map(|_| {
                    let mut bytes = [0_u8; CODE_ENTROPY];
                    rng.fill_bytes(&mut bytes);
                    format_code(&label, &URL_SAFE.encode(bytes))
                })
                .collect()
        };

        self.mirror.insert_redemption_codes(&codes, quota, now).await?;

        tracing::info!(count, quota, batch = %label, "redemption codes generated");
        Ok(codes)
    }

    /// Consume `code` for `identity_id` and grant its quota
    ///
    /// Consuming the code and the local grant commit together; exactly one
    /// concurrent caller wins and the rest get `Conflict`. The upstream
    /// increment follows like any other grant.
    pub async fn redeem_code(&self, code: &str, identity_id: u64) -> Result<Redemption, LedgerError> {
        let now = now_unix();
        let marker = self
            .mirror
            .redeem_code(code, identity_id, now, now + CLAIM_LEASE_SECS)
            .await?;
        let reconciled = self.ledger.apply(&marker).await;

        tracing::info!(
            identity_id,
            token_id = marker.token_id,
            quota = marker.delta,
            reconciled,
            "redemption code consumed"
        );

        Ok(Redemption {
            quota: marker.delta,
            reconciled,
        })
    }

    /// Quota an unused code would grant
    pub async fn redeem_code_info(&self, code: &str) -> Result<i64, LedgerError> {
        self.mirror
            .unused_redemption_code(code)
            .await?
            .map(|code| code.quota)
            .ok_or_else(|| LedgerError::Conflict("redemption code is invalid or already used".to_owned()))
    }
}

/// `RC-` followed by the label and random part with separators removed,
/// grouped as 4-4-rest
fn format_code(label: &str, random: &str) -> String {
    let body: String = label
        .chars()
        .chain(random.chars())
        .filter(|c| *c != '-' && *c != '_')
        .collect();

    let mut chars = body.chars();
    let first: String = chars.by_ref().take(4).collect();
    let second: String = chars.by_ref().take(4).collect();
    let rest: String = chars.collect();

    format!("RC-{first}-{second}-{rest}")
}

#[cfg(test)]
mod tests {
    use tollgate_store::memory::{MemoryMirrorStore, MemoryUpstreamStore};
    use tollgate_store::{IdentitySnapshot, UpstreamToken};
    use tollgate_telemetry::Metrics;

    use super::*;

    async fn service() -> (Arc<MemoryMirrorStore>, Arc<MemoryUpstreamStore>, RedemptionService, u64) {
        let mirror = Arc::new(MemoryMirrorStore::new());
        let upstream = Arc::new(MemoryUpstreamStore::new());
        upstream
            .insert_token(UpstreamToken {
                id: 7,
                key: "abc".to_owned(),
                status: 1,
                name: "default".to_owned(),
                expired_time: -1,
                remain_quota: 0,
                used_quota: 0,
            })
            .await;
        let identity = mirror
            .insert_identity(
                "abc",
                &IdentitySnapshot {
                    token_id: 7,
                    remain_quota: 0,
                    used_quota: 0,
                    expired_time: -1,
                    status: 1,
                },
                0,
            )
            .await
            .unwrap();

        let ledger = QuotaLedger::new(mirror.clone(), upstream.clone(), Metrics::global());
        let service = RedemptionService::new(mirror.clone(), ledger);
        (mirror, upstream, service, identity.id)
    }

    #[test]
    fn code_layout() {
        let code = format_code("B1700000000", "ab-c_defghijklmno");
        assert_eq!(code, "RC-B170-0000-000abcdefghijklmno");
    }

    #[tokio::test]
    async fn generated_codes_are_unique_and_redeemable() {
        let (_mirror, _upstream, service, _id) = service().await;

        let codes = service.generate_codes(20, 500_000, Some("SPRING")).await.unwrap();
        assert_eq!(codes.len(), 20);
        assert!(codes.iter().all(|code| code.starts_with("RC-SPRI-NG")));

        let mut unique = codes.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 20);

        assert_eq!(service.redeem_code_info(&codes[0]).await.unwrap(), 500_000);
    }

    #[tokio::test]
    async fn batch_bounds_are_enforced() {
        let (_mirror, _upstream, service, _id) = service().await;

        for (count, quota) in [(0, 10), (1001, 10), (1, 0)] {
            assert!(matches!(
                service.generate_codes(count, quota, None).await,
                Err(LedgerError::InvalidInput(_))
            ));
        }
    }

    #[tokio::test]
    async fn concurrent_redemption_grants_once() {
        let (mirror, upstream, service, id) = service().await;
        let code = service.generate_codes(1, 500_000, None).await.unwrap().remove(0);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = service.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move { service.redeem_code(&code, id).await }));
        }

        let mut succeeded = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(redemption) => {
                    assert_eq!(redemption.quota, 500_000);
                    succeeded += 1;
                }
                Err(LedgerError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!((succeeded, conflicts), (1, 9));
        assert_eq!(mirror.identity_by_id(id).await.unwrap().unwrap().remain_quota, 500_000);
        assert_eq!(upstream.token(7).await.unwrap().remain_quota, 500_000);
        assert_eq!(mirror.redemption_logs().await.len(), 1);
    }

    #[tokio::test]
    async fn used_code_has_no_info() {
        let (_mirror, _upstream, service, id) = service().await;
        let code = service.generate_codes(1, 10, None).await.unwrap().remove(0);

        service.redeem_code(&code, id).await.unwrap();

        assert!(matches!(
            service.redeem_code_info(&code).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn failed_grant_keeps_code_redeemable() {
        let (mirror, upstream, service, id) = service().await;
        let code = service.generate_codes(1, 10, None).await.unwrap().remove(0);

        mirror.set_grants_failing(true);
        assert!(matches!(
            service.redeem_code(&code, id).await,
            Err(LedgerError::Store(_))
        ));
        assert_eq!(service.redeem_code_info(&code).await.unwrap(), 10);
        assert!(mirror.redemption_logs().await.is_empty());

        mirror.set_grants_failing(false);
        let redemption = service.redeem_code(&code, id).await.unwrap();
        assert!(redemption.reconciled);
        assert_eq!(mirror.identity_by_id(id).await.unwrap().unwrap().remain_quota, 10);
        assert_eq!(upstream.token(7).await.unwrap().remain_quota, 10);
    }

    #[tokio::test]
    async fn upstream_outage_leaves_redemption_for_reconciler() {
        let (mirror, upstream, service, id) = service().await;
        let code = service.generate_codes(1, 10, None).await.unwrap().remove(0);

        upstream.set_writes_failing(true);
        let redemption = service.redeem_code(&code, id).await.unwrap();
        assert!(!redemption.reconciled);
        assert_eq!(mirror.pending_markers().await.len(), 1);
        assert!(service.redeem_code_info(&code).await.is_err());
    }
}

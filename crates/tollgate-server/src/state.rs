use std::ops::Deref;
use std::sync::Arc;

use secrecy::SecretString;
use tollgate_auth::Authenticator;
use tollgate_cache::Backends;
use tollgate_config::{Config, parse_duration};
use tollgate_ledger::{LogService, QuotaLedger, RedemptionService};
use tollgate_ratelimit::RequestLimiter;
use tollgate_relay::Relay;
use tollgate_store::{MirrorStore, UpstreamStore};
use tollgate_sync::SyncEngine;
use tollgate_telemetry::Metrics;

/// Domain services behind the HTTP surface
pub struct Services {
    pub authenticator: Authenticator,
    pub limiter: RequestLimiter,
    pub relay: Relay,
    pub engine: SyncEngine,
    pub ledger: QuotaLedger,
    pub redemption: RedemptionService,
    pub logs: LogService,
    pub metrics: Metrics,
    pub admin_secret: Option<SecretString>,
}

impl Services {
    /// Wire every service from configuration and connected backends
    pub fn build(
        config: &Config,
        mirror: Arc<dyn MirrorStore>,
        upstream: Arc<dyn UpstreamStore>,
        backends: &Backends,
        metrics: &Metrics,
    ) -> anyhow::Result<Self> {
        let engine = SyncEngine::new(mirror.clone(), upstream.clone(), metrics.clone());
        let ledger = QuotaLedger::new(mirror.clone(), upstream, metrics.clone());

        let authenticator = Authenticator::new(
            backends.cache.clone(),
            engine.clone(),
            parse_duration(&config.auth.cache_ttl)?,
            parse_duration(&config.auth.refresh_after)?,
        );

        Ok(Self {
            authenticator,
            limiter: RequestLimiter::new(&config.rate_limit, backends.cache.clone())?,
            relay: Relay::new(
                &config.upstream,
                backends.cache.clone(),
                backends.queue.clone(),
                metrics.clone(),
            )?,
            redemption: RedemptionService::new(mirror.clone(), ledger.clone()),
            logs: LogService::new(mirror, config.sync.retention_days),
            engine,
            ledger,
            metrics: metrics.clone(),
            admin_secret: config.server.admin_secret.clone(),
        })
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState(Arc<Services>);

impl AppState {
    pub fn new(services: Services) -> Self {
        Self(Arc::new(services))
    }
}

impl Deref for AppState {
    type Target = Services;

    fn deref(&self) -> &Services {
        &self.0
    }
}

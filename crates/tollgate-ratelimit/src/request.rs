use std::sync::Arc;
use std::time::Duration;

use tollgate_cache::QuotaCache;
use tollgate_config::{RateLimitConfig, RequestRateLimit};

use crate::{FixedWindowLimiter, RateLimitError};

/// Rate-limited endpoint groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Billing subscription and usage
    Billing,
    /// Usage log listing
    Logs,
}

impl Endpoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Billing => "billing",
            Self::Logs => "logs",
        }
    }
}

/// Per-endpoint limiters built from configuration
#[derive(Clone)]
pub struct RequestLimiter {
    billing: FixedWindowLimiter,
    logs: FixedWindowLimiter,
}

impl RequestLimiter {
    pub fn new(config: &RateLimitConfig, cache: Arc<dyn QuotaCache>) -> Result<Self, RateLimitError> {
        Ok(Self {
            billing: build(Endpoint::Billing, &config.billing, cache.clone())?,
            logs: build(Endpoint::Logs, &config.logs, cache)?,
        })
    }

    pub async fn check(&self, endpoint: Endpoint, identity_id: u64) -> Result<(), RateLimitError> {
        match endpoint {
            Endpoint::Billing => self.billing.check(identity_id).await,
            Endpoint::Logs => self.logs.check(identity_id).await,
        }
    }
}

fn build(
    endpoint: Endpoint,
    rate_limit: &RequestRateLimit,
    cache: Arc<dyn QuotaCache>,
) -> Result<FixedWindowLimiter, RateLimitError> {
    let window = parse_window(&rate_limit.window)?;
    Ok(FixedWindowLimiter::new(cache, endpoint.as_str(), rate_limit.requests, window))
}

fn parse_window(s: &str) -> Result<Duration, RateLimitError> {
    let window = tollgate_config::parse_duration(s)
        .map_err(|e| RateLimitError::Config(format!("invalid window '{s}': {e}")))?;

    if window.is_zero() {
        return Err(RateLimitError::Config("rate limit window must be > 0".to_owned()));
    }
    Ok(window)
}

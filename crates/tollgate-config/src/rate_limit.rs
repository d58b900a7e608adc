use serde::Deserialize;

/// Per-endpoint request rate limits
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Billing subscription and usage queries
    #[serde(default = "default_billing")]
    pub billing: RequestRateLimit,
    /// Usage log queries
    #[serde(default = "default_logs")]
    pub logs: RequestRateLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            billing: default_billing(),
            logs: default_logs(),
        }
    }
}

/// Request-based rate limit
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestRateLimit {
    /// Maximum requests per window
    pub requests: u32,
    /// Window duration (e.g. "1m", "1h")
    #[serde(default = "default_window")]
    pub window: String,
}

fn default_window() -> String {
    "60s".to_owned()
}

fn default_billing() -> RequestRateLimit {
    RequestRateLimit {
        requests: 10,
        window: default_window(),
    }
}

fn default_logs() -> RequestRateLimit {
    RequestRateLimit {
        requests: 30,
        window: default_window(),
    }
}

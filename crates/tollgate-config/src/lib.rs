#![allow(clippy::must_use_candidate)]

pub mod auth;
pub mod cache;
pub mod database;
mod env;
pub mod health;
mod loader;
pub mod rate_limit;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod upstream;

use std::time::Duration;

use serde::Deserialize;

pub use auth::*;
pub use cache::*;
pub use database::*;
pub use health::*;
pub use rate_limit::*;
pub use server::*;
pub use sync::*;
pub use telemetry::TelemetryConfig;
pub use upstream::*;

/// Top-level Tollgate configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Mirror and upstream database connections
    pub database: DatabaseConfig,
    /// Quota cache and work queue backend
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upstream completion service
    pub upstream: UpstreamConfig,
    /// Per-endpoint rate limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Credential authentication
    #[serde(default)]
    pub auth: AuthConfig,
    /// Background synchronization and maintenance jobs
    #[serde(default)]
    pub sync: SyncConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

/// Parse a human-readable duration such as `"60s"`, `"5m"` or `"2h"`
///
/// # Errors
///
/// Returns an error if the string is not a valid duration
pub fn parse_duration(value: &str) -> anyhow::Result<Duration> {
    duration_str::parse(value).map_err(|e| anyhow::anyhow!("invalid duration '{value}': {e}"))
}

use secrecy::SecretString;
use serde::Deserialize;

/// Relational store connections
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Locally owned mirror database (MySQL DSN)
    pub mirror_url: SecretString,
    /// Upstream system-of-record database (MySQL DSN)
    pub upstream_url: SecretString,
    /// Maximum pooled connections per database
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Create missing mirror tables on startup
    #[serde(default = "default_bootstrap_schema")]
    pub bootstrap_schema: bool,
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_connections() -> u32 {
    10
}

#[allow(clippy::missing_const_for_fn)]
fn default_bootstrap_schema() -> bool {
    true
}

use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::health::HealthConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<SocketAddr>,
    #[serde(default)]
    pub health: HealthConfig,
    /// Shared secret expected as the bearer token on `/api/admin` routes
    #[serde(default)]
    pub admin_secret: Option<SecretString>,
}

//! MySQL-backed stores

mod mirror;
mod schema;
mod upstream;

use secrecy::{ExposeSecret, SecretString};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

pub use mirror::MySqlMirrorStore;
pub use upstream::MySqlUpstreamStore;

use crate::StoreError;

/// Open a connection pool
pub async fn connect(url: &SecretString, max_connections: u32) -> Result<MySqlPool, StoreError> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .connect(url.expose_secret())
        .await?;

    Ok(pool)
}

use serde::Deserialize;

/// Credential authentication settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// How long a resolved credential stays cached (e.g. "2h")
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: String,
    /// Mirror rows older than this are refreshed from upstream on lookup
    #[serde(default = "default_refresh_after")]
    pub refresh_after: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_cache_ttl(),
            refresh_after: default_refresh_after(),
        }
    }
}

fn default_cache_ttl() -> String {
    "2h".to_owned()
}

fn default_refresh_after() -> String {
    "5m".to_owned()
}

use indexmap::IndexMap;
use serde::Deserialize;
use url::Url;

/// Upstream completion service
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the upstream deployment, without the `/v1` suffix
    pub base_url: Url,
    /// Outbound request timeout (e.g. "60s")
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Caller-visible model alias mapped to concrete upstream models, in preference order
    #[serde(default)]
    pub model_mapping: IndexMap<String, Vec<String>>,
}

fn default_timeout() -> String {
    "60s".to_owned()
}

//! Programmatic configuration builder for integration tests

use tollgate_config::Config;

pub const ADMIN_SECRET: &str = "it-admin-secret";

/// Builder for constructing test configurations
///
/// Renders a TOML document so the result goes through the same validation
/// as a config file on disk.
pub struct ConfigBuilder {
    upstream: String,
    model_mapping: Vec<(String, Vec<String>)>,
    billing_requests: u32,
    logs_requests: u32,
    health: bool,
}

impl ConfigBuilder {
    /// Create a builder pointed at the given upstream base URL
    pub fn new(upstream: &str) -> Self {
        Self {
            upstream: upstream.to_owned(),
            model_mapping: Vec::new(),
            billing_requests: 10,
            logs_requests: 30,
            health: true,
        }
    }

    /// Map a caller-visible alias to upstream models
    pub fn with_model(mut self, alias: &str, targets: &[&str]) -> Self {
        self.model_mapping
            .push((alias.to_owned(), targets.iter().map(|t| (*t).to_owned()).collect()));
        self
    }

    /// Override the billing request budget per window
    pub fn with_billing_limit(mut self, requests: u32) -> Self {
        self.billing_requests = requests;
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.health = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        let mut raw = format!(
            r#"
            [server]
            admin_secret = "{ADMIN_SECRET}"

            [server.health]
            enabled = {health}

            [database]
            mirror_url = "mysql://localhost/mirror"
            upstream_url = "mysql://localhost/upstream"

            [upstream]
            base_url = "{upstream}"
            timeout = "5s"

            [rate_limit.billing]
            requests = {billing}

            [rate_limit.logs]
            requests = {logs}
            "#,
            health = self.health,
            upstream = self.upstream,
            billing = self.billing_requests,
            logs = self.logs_requests,
        );

        if !self.model_mapping.is_empty() {
            raw.push_str("\n[upstream.model_mapping]\n");
            for (alias, targets) in &self.model_mapping {
                let targets: Vec<String> = targets.iter().map(|t| format!("\"{t}\"")).collect();
                raw.push_str(&format!("{alias} = [{}]\n", targets.join(", ")));
            }
        }

        Config::from_toml(&raw).expect("test config is valid")
    }
}

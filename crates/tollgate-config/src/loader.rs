use std::path::Path;

use secrecy::ExposeSecret;

use crate::{Config, RequestRateLimit, parse_duration};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from raw TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error on empty secrets, zero limits, unparseable
    /// durations or empty model mappings
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_upstream()?;
        self.validate_rate_limits()?;
        self.validate_durations()?;
        self.validate_sync()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if let Some(ref secret) = self.server.admin_secret
            && secret.expose_secret().is_empty()
        {
            anyhow::bail!("server.admin_secret must not be empty when set");
        }

        Ok(())
    }

    fn validate_upstream(&self) -> anyhow::Result<()> {
        for (alias, targets) in &self.upstream.model_mapping {
            if targets.is_empty() {
                anyhow::bail!("upstream.model_mapping.{alias} must list at least one upstream model");
            }
        }

        Ok(())
    }

    fn validate_rate_limits(&self) -> anyhow::Result<()> {
        let limits: [(&str, &RequestRateLimit); 2] =
            [("billing", &self.rate_limit.billing), ("logs", &self.rate_limit.logs)];

        for (endpoint, limit) in limits {
            if limit.requests == 0 {
                anyhow::bail!("rate_limit.{endpoint}.requests must be greater than 0");
            }
        }

        Ok(())
    }

    fn validate_durations(&self) -> anyhow::Result<()> {
        let durations = [
            ("upstream.timeout", &self.upstream.timeout),
            ("rate_limit.billing.window", &self.rate_limit.billing.window),
            ("rate_limit.logs.window", &self.rate_limit.logs.window),
            ("auth.cache_ttl", &self.auth.cache_ttl),
            ("auth.refresh_after", &self.auth.refresh_after),
            ("sync.users_interval", &self.sync.users_interval),
            ("sync.logs_interval", &self.sync.logs_interval),
            ("sync.model_status_interval", &self.sync.model_status_interval),
            ("sync.reconcile_interval", &self.sync.reconcile_interval),
            ("sync.worker_poll_timeout", &self.sync.worker_poll_timeout),
        ];

        for (field, value) in durations {
            let parsed = parse_duration(value).map_err(|e| anyhow::anyhow!("{field}: {e}"))?;
            if parsed.is_zero() {
                anyhow::bail!("{field} must be greater than 0");
            }
        }

        Ok(())
    }

    fn validate_sync(&self) -> anyhow::Result<()> {
        if self.sync.retention_days == 0 {
            anyhow::bail!("sync.retention_days must be greater than 0");
        }

        if self.sync.cleanup_at_hour > 23 {
            anyhow::bail!("sync.cleanup_at_hour must be between 0 and 23");
        }

        if self.sync.workers == 0 {
            anyhow::bail!("sync.workers must be greater than 0");
        }

        Ok(())
    }
}

//! Model alias resolution and availability flags

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tollgate_cache::{QuotaCache, keys};

use crate::RelayError;

const AVAILABLE: &str = "available";
const STATUS_TTL: Duration = Duration::from_secs(3600);

/// Caller-visible aliases and the upstream models behind them
#[derive(Clone)]
pub struct ModelCatalog {
    mapping: IndexMap<String, Vec<String>>,
    cache: Arc<dyn QuotaCache>,
}

impl ModelCatalog {
    pub fn new(mapping: IndexMap<String, Vec<String>>, cache: Arc<dyn QuotaCache>) -> Self {
        Self { mapping, cache }
    }

    /// Concrete upstream model for `alias`
    ///
    /// The first target flagged available wins, falling back to the first
    /// target. Unmapped aliases pass through unchanged.
    pub async fn resolve(&self, alias: &str) -> String {
        let Some(targets) = self.mapping.get(alias) else {
            return alias.to_owned();
        };

        for target in targets {
            match self.cache.get(&keys::model_status(target)).await {
                Ok(Some(status)) if status == AVAILABLE => return target.clone(),
                Ok(_) => {}
                Err(e) => tracing::warn!(model = %target, error = %e, "model status lookup failed"),
            }
        }

        targets.first().cloned().unwrap_or_else(|| alias.to_owned())
    }

    /// Rewrite an upstream pricing table in terms of aliases
    ///
    /// Entries whose `model_name` is not a mapped target are dropped. When
    /// several targets share an alias the last one listed upstream wins.
    pub fn map_models(&self, mut pricing: Value) -> Value {
        let Some(entries) = pricing.get_mut("data").and_then(Value::as_array_mut) else {
            return pricing;
        };

        let aliases: HashMap<&str, &str> = self
            .mapping
            .iter()
            .flat_map(|(alias, targets)| targets.iter().map(move |target| (target.as_str(), alias.as_str())))
            .collect();

        let mut by_alias: HashMap<&str, Value> = HashMap::new();
        for entry in entries.drain(..) {
            let Some(alias) = entry
                .get("model_name")
                .and_then(Value::as_str)
                .and_then(|name| aliases.get(name).copied())
            else {
                continue;
            };
            by_alias.insert(alias, entry);
        }

        for alias in self.mapping.keys() {
            if let Some(mut entry) = by_alias.remove(alias.as_str()) {
                entry["model_name"] = Value::String(alias.clone());
                entries.push(entry);
            }
        }

        pricing
    }

    /// Flag every mapped target as available for the next hour
    pub async fn refresh_model_status(&self) -> Result<usize, RelayError> {
        let mut refreshed = 0;
        for target in self.mapping.values().flatten() {
            self.cache
                .set_ex(&keys::model_status(target), AVAILABLE, STATUS_TTL)
                .await?;
            refreshed += 1;
        }

        tracing::debug!(refreshed, "model status refreshed");
        Ok(refreshed)
    }
}

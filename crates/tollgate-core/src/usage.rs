use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Credential;

/// Token usage reported by the upstream in a completion response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    /// Provider-specific detail fields, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Usage published by the relay and consumed by the ingestion worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Credential that made the call
    #[serde(rename = "api_key")]
    pub credential: Credential,
    /// Model alias the caller requested
    pub model: String,
    pub usage: Usage,
    /// Wall time of a non-streaming call in milliseconds
    #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_wire_shape() {
        let event = UsageEvent {
            credential: Credential::parse("sk-abc").unwrap(),
            model: "claude37".to_owned(),
            usage: Usage {
                prompt_tokens: 5,
                completion_tokens: 7,
                total_tokens: 12,
                extra: Map::new(),
            },
            duration_ms: None,
        };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "api_key": "abc",
                "model": "claude37",
                "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
            })
        );
    }

    #[test]
    fn usage_keeps_unknown_fields() {
        let usage: Usage = serde_json::from_value(json!({
            "prompt_tokens": 3,
            "completion_tokens": 4,
            "prompt_tokens_details": {"cached_tokens": 1}
        }))
        .unwrap();

        assert_eq!(usage.total_tokens, 0);
        assert!(usage.extra.contains_key("prompt_tokens_details"));
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderValue, StatusCode};
use reqwest::{Client, Response};
use serde_json::Value;
use tollgate_cache::{QuotaCache, WorkQueue, get_json, keys, set_json};
use tollgate_config::UpstreamConfig;
use tollgate_core::{Credential, Usage, UsageEvent};
use tollgate_telemetry::Metrics;
use url::Url;

use crate::stream::{self, EventStream};
use crate::{ModelCatalog, RelayError};

const BILLING_TTL: Duration = Duration::from_secs(300);
const PRICING_TTL: Duration = Duration::from_secs(3600);

/// Reply to a completion call
pub enum RelayResponse {
    /// Buffered upstream reply, passed through verbatim
    Complete {
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },
    /// Event stream relayed line by line
    Stream(EventStream),
}

/// Forwards caller traffic to the upstream service and reports usage
#[derive(Clone)]
pub struct Relay {
    client: Client,
    base_url: Url,
    catalog: ModelCatalog,
    cache: Arc<dyn QuotaCache>,
    queue: Arc<dyn WorkQueue>,
    metrics: Metrics,
}

impl Relay {
    pub fn new(
        config: &UpstreamConfig,
        cache: Arc<dyn QuotaCache>,
        queue: Arc<dyn WorkQueue>,
        metrics: Metrics,
    ) -> Result<Self, RelayError> {
        let timeout = tollgate_config::parse_duration(&config.timeout)
            .map_err(|e| RelayError::Config(format!("invalid upstream timeout '{}': {e}", config.timeout)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            catalog: ModelCatalog::new(config.model_mapping.clone(), cache.clone()),
            cache,
            queue,
            metrics,
        })
    }

    pub const fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }

    /// Forward a chat completion and publish the usage it reports
    ///
    /// The caller's `model` alias is rewritten to a concrete upstream model;
    /// the published event keeps the alias.
    pub async fn chat_completions(&self, credential: &Credential, mut body: Value) -> Result<RelayResponse, RelayError> {
        let alias = body
            .get("model")
            .and_then(Value::as_str)
            .filter(|model| !model.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| RelayError::InvalidRequest("missing model parameter".to_owned()))?;
        let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let target = self.catalog.resolve(&alias).await;
        body["model"] = Value::String(target.clone());

        tracing::debug!(model = %alias, target = %target, stream = streaming, "relaying chat completion");

        let start = Instant::now();
        let response = match self.send_completion(credential, &body).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_relay(start, &alias, streaming, "upstream_error");
                return Err(e);
            }
        };

        if streaming {
            Ok(self.relay_stream(credential.clone(), alias, response.bytes_stream(), start))
        } else {
            self.relay_complete(credential, alias, response, start).await
        }
    }

    async fn send_completion(&self, credential: &Credential, body: &Value) -> Result<Response, RelayError> {
        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .bearer_auth(credential.bearer())
            .json(body)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "upstream request failed"))?;

        ensure_success(response).await
    }

    async fn relay_complete(
        &self,
        credential: &Credential,
        alias: String,
        response: Response,
        start: Instant,
    ) -> Result<RelayResponse, RelayError> {
        let status = response.status();
        let content_type = response.headers().get(http::header::CONTENT_TYPE).cloned();
        let body = response.bytes().await?;

        let usage = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|mut reply| reply.get_mut("usage").map(Value::take))
            .filter(Value::is_object)
            .and_then(|usage| serde_json::from_value::<Usage>(usage).ok());

        let elapsed = start.elapsed();
        self.metrics.record_relay(start, &alias, false, "ok");

        if let Some(usage) = usage {
            let event = UsageEvent {
                credential: credential.clone(),
                model: alias,
                usage,
                duration_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            };
            publish(self.queue.as_ref(), &self.metrics, &event).await;
        }

        Ok(RelayResponse::Complete {
            status,
            content_type,
            body,
        })
    }

    /// Hand `upstream` to the caller line by line; usage is published once
    /// the upstream closes
    fn relay_stream<S, E>(&self, credential: Credential, alias: String, upstream: S, start: Instant) -> RelayResponse
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (body, pump) = stream::relay_lines(upstream);

        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let lines = match pump.await {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::error!(error = %e, "stream relay task failed");
                    return;
                }
            };
            metrics.record_relay(start, &alias, true, "ok");

            let Some(usage) = stream::find_usage(&lines) else {
                tracing::debug!(model = %alias, lines = lines.len(), "stream closed without usage");
                return;
            };

            let event = UsageEvent {
                credential,
                model: alias,
                usage,
                duration_ms: None,
            };
            publish(queue.as_ref(), &metrics, &event).await;
        });

        RelayResponse::Stream(body)
    }

    /// Upstream billing subscription for a credential, cached for five minutes
    pub async fn billing_subscription(&self, credential: &Credential, use_cache: bool) -> Result<Value, RelayError> {
        let key = keys::billing(credential.as_str());

        if use_cache && let Some(cached) = self.cached(&key).await {
            return Ok(cached);
        }

        let response = self
            .client
            .get(self.url("/v1/dashboard/billing/subscription"))
            .bearer_auth(credential.bearer())
            .send()
            .await?;
        let subscription: Value = ensure_success(response).await?.json().await?;

        self.store(&key, &subscription, BILLING_TTL).await;
        Ok(subscription)
    }

    /// Upstream pricing table, cached for an hour
    pub async fn model_pricing(&self) -> Result<Value, RelayError> {
        if let Some(cached) = self.cached(keys::MODEL_PRICING).await {
            return Ok(cached);
        }

        let response = self.client.get(self.url("/api/pricing")).send().await?;
        let pricing: Value = ensure_success(response).await?.json().await?;

        self.store(keys::MODEL_PRICING, &pricing, PRICING_TTL).await;
        Ok(pricing)
    }

    async fn cached(&self, key: &str) -> Option<Value> {
        get_json(self.cache.as_ref(), key)
            .await
            .inspect_err(|e| tracing::warn!(key, error = %e, "cache read failed"))
            .ok()
            .flatten()
    }

    async fn store(&self, key: &str, value: &Value, ttl: Duration) {
        if let Err(e) = set_json(self.cache.as_ref(), key, value, ttl).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, "upstream returned error");
    Err(RelayError::UpstreamUnavailable(format!("upstream returned {status}: {body}")))
}

async fn publish(queue: &dyn WorkQueue, metrics: &Metrics, event: &UsageEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode usage event");
            return;
        }
    };

    match queue.publish(keys::USAGE_TOPIC, &payload).await {
        Ok(()) => {
            metrics.usage_event_published(&event.model);
            metrics.token_usage(&event.model, event.usage.prompt_tokens, event.usage.completion_tokens);
        }
        Err(e) => tracing::error!(credential = ?event.credential, model = %event.model, error = %e, "failed to publish usage event"),
    }
}

//! Metric names and the handle components record through

use std::time::Instant;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

pub const HTTP_REQUEST_DURATION: &str = "http.server.request.duration";
pub const HTTP_REQUEST_COUNT: &str = "http.server.request.count";

pub const RELAY_REQUEST_DURATION: &str = "tollgate.relay.request.duration";
pub const USAGE_EVENTS_PUBLISHED: &str = "tollgate.usage.events.published";
pub const SYNC_ROWS_MIRRORED: &str = "tollgate.sync.rows.mirrored";
pub const RECONCILIATION_PENDING: &str = "tollgate.reconciliation.pending";
pub const TOKEN_USAGE: &str = "tollgate.token.usage";

/// Instruments shared by the server, relay, sync engine and ledger
///
/// Built once in `main` and cloned into each component. When no meter
/// provider is installed the instruments are no-ops, which is what tests get
/// from [`Metrics::global`].
#[derive(Clone, Debug)]
pub struct Metrics {
    http_duration: Histogram<f64>,
    http_count: Counter<u64>,
    relay_duration: Histogram<f64>,
    token_usage: Counter<u64>,
    usage_events: Counter<u64>,
    rows_mirrored: Counter<u64>,
    reconciliation_pending: Gauge<u64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            http_duration: meter
                .f64_histogram(HTTP_REQUEST_DURATION)
                .with_unit("s")
                .with_description("HTTP request latency")
                .build(),
            http_count: meter
                .u64_counter(HTTP_REQUEST_COUNT)
                .with_description("HTTP requests served")
                .build(),
            token_usage: meter
                .u64_counter(TOKEN_USAGE)
                .with_description("Tokens reported by completed relays")
                .build(),
            relay_duration: meter
                .f64_histogram(RELAY_REQUEST_DURATION)
                .with_unit("s")
                .with_description("Completion relay latency")
                .build(),
            usage_events: meter
                .u64_counter(USAGE_EVENTS_PUBLISHED)
                .with_description("Usage events handed to the work queue")
                .build(),
            rows_mirrored: meter
                .u64_counter(SYNC_ROWS_MIRRORED)
                .with_description("Upstream log rows copied into the mirror")
                .build(),
            reconciliation_pending: meter
                .u64_gauge(RECONCILIATION_PENDING)
                .with_description("Quota grants not yet applied upstream")
                .build(),
        }
    }

    /// Instruments on the globally installed meter provider
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter("tollgate"))
    }

    /// Record one served request; `route` is the matched route template
    pub fn record_http(&self, start: Instant, method: &str, route: &str, status: u16) {
        let attributes = [
            KeyValue::new("http.request.method", method.to_owned()),
            KeyValue::new("http.route", route.to_owned()),
            KeyValue::new("http.response.status_code", i64::from(status)),
        ];
        self.http_count.add(1, &attributes);
        self.http_duration.record(start.elapsed().as_secs_f64(), &attributes);
    }

    pub fn record_relay(&self, start: Instant, model: &str, stream: bool, outcome: &'static str) {
        self.relay_duration.record(
            start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("model", model.to_owned()),
                KeyValue::new("stream", stream),
                KeyValue::new("outcome", outcome),
            ],
        );
    }

    pub fn usage_event_published(&self, model: &str) {
        self.usage_events.add(1, &[KeyValue::new("model", model.to_owned())]);
    }

    pub fn token_usage(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) {
        let model = KeyValue::new("model", model.to_owned());
        self.token_usage
            .add(prompt_tokens, &[model.clone(), KeyValue::new("kind", "prompt")]);
        self.token_usage
            .add(completion_tokens, &[model, KeyValue::new("kind", "completion")]);
    }

    pub fn rows_mirrored(&self, count: u64) {
        if count > 0 {
            self.rows_mirrored.add(count, &[]);
        }
    }

    pub fn reconciliation_pending(&self, count: u64) {
        self.reconciliation_pending.record(count, &[]);
    }
}

//! Telemetry for Tollgate
//!
//! Structured logging through `tracing`, with optional OTLP export of spans
//! and metrics.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod metadata;
pub mod metrics;

use std::time::Duration;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tollgate_config::TelemetryConfig;
use tollgate_config::telemetry::exporters::{ExportProtocol, ExporterConfig};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

pub use metrics::Metrics;

/// Owns the OTLP providers; flushes and shuts them down on drop
///
/// Hold it in `main` for the life of the process.
#[derive(Default)]
pub struct TelemetryGuard {
    meter_provider: Option<SdkMeterProvider>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn force_flush(&self) -> anyhow::Result<()> {
        if let Some(provider) = &self.meter_provider {
            provider
                .force_flush()
                .map_err(|e| anyhow::anyhow!("failed to flush metrics: {e}"))?;
        }
        Ok(())
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown meter provider: {e}");
        }
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("failed to shutdown tracer provider: {e}");
        }
    }
}

/// Install the global subscriber and, when an exporter is configured, the
/// OTLP meter and tracer providers
///
/// `log_filter` is an `EnvFilter` directive; an invalid one falls back to
/// `info`.
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let mut guard = TelemetryGuard::default();

    let otel_layer = match config {
        Some(config) if config.has_exporter() => {
            let resource = metadata::build_resource(config);

            let meter_provider = init_metrics(config, resource.clone())?;
            global::set_meter_provider(meter_provider.clone());
            guard.meter_provider = Some(meter_provider);

            let tracer_provider = init_tracer(config, resource)?;
            let tracer = tracer_provider.tracer("tollgate");
            global::set_tracer_provider(tracer_provider.clone());
            guard.tracer_provider = Some(tracer_provider);

            Some(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
        }
        _ => None,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    tracing::debug!(otlp = guard.tracer_provider.is_some(), "telemetry initialized");
    Ok(guard)
}

/// The signal-specific exporter, falling back to the shared one
fn exporter_for<'a>(config: &'a TelemetryConfig, specific: Option<&'a ExporterConfig>) -> Option<&'a ExporterConfig> {
    specific.or(config.exporter.as_ref())
}

fn init_metrics(config: &TelemetryConfig, resource: Resource) -> anyhow::Result<SdkMeterProvider> {
    use opentelemetry_otlp::MetricExporter;

    let specific = config.metrics.as_ref().and_then(|m| m.exporter.as_ref());
    let Some(exporter_config) = exporter_for(config, specific) else {
        return Ok(SdkMeterProvider::builder().with_resource(resource).build());
    };

    let exporter = match exporter_config.protocol {
        ExportProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(exporter_config.endpoint.as_str())
            .build(),
        ExportProtocol::HttpProto => MetricExporter::builder()
            .with_http()
            .with_endpoint(exporter_config.endpoint.as_str())
            .build(),
    }
    .map_err(|e| anyhow::anyhow!("failed to build metrics exporter: {e}"))?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(exporter_config.export_interval))
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

fn init_tracer(config: &TelemetryConfig, resource: Resource) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_otlp::SpanExporter;

    let specific = config.tracing.as_ref().and_then(|t| t.exporter.as_ref());
    let Some(exporter_config) = exporter_for(config, specific) else {
        return Ok(SdkTracerProvider::builder().with_resource(resource).build());
    };

    let exporter = match exporter_config.protocol {
        ExportProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(exporter_config.endpoint.as_str())
            .build(),
        ExportProtocol::HttpProto => SpanExporter::builder()
            .with_http()
            .with_endpoint(exporter_config.endpoint.as_str())
            .build(),
    }
    .map_err(|e| anyhow::anyhow!("failed to build span exporter: {e}"))?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(sampler(config))
        .with_batch_exporter(exporter)
        .build())
}

fn sampler(config: &TelemetryConfig) -> Sampler {
    let rate = config.tracing.as_ref().map_or(1.0, |t| t.sampling_rate);

    let base = if rate >= 1.0 {
        Sampler::AlwaysOn
    } else if rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(rate)
    };

    if config.tracing.as_ref().is_none_or(|t| t.parent_based) {
        Sampler::ParentBased(Box::new(base))
    } else {
        base
    }
}

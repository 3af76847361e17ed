// Logging, tracing export and Prometheus metrics for the reminder engine

use crate::models::{ReminderVariant, TaskId};
use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime::Tokio,
    trace::{Config as TraceConfig, RandomIdGenerator, Sampler, Tracer, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "team-reminder";

pub mod metric_names {
    pub const FIRED: &str = "reminder_fired_total";
    pub const FAILED: &str = "reminder_failed_total";
    pub const FIRE_DURATION: &str = "reminder_fire_duration_seconds";
    pub const AUDIENCE_SIZE: &str = "reminder_audience_size";
    pub const JOBS_ACTIVE: &str = "reminder_jobs_active";
    pub const COMPLETIONS: &str = "reminder_completions_total";
}

/// `RUST_LOG` wins over the configured level
fn build_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log filter '{}'", log_level))
}

/// Install the JSON log subscriber. With `tracing_endpoint` set, spans are
/// exported over OTLP as well.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(build_filter(log_level)?);

    let registry = tracing_subscriber::registry().with(json_layer);
    let installed = match tracing_endpoint {
        Some(endpoint) => registry
            .with(tracing_opentelemetry::layer().with_tracer(init_tracer(endpoint)?))
            .try_init(),
        None => registry.try_init(),
    };
    installed.context("Failed to install log subscriber")?;

    tracing::info!(
        log_level,
        otlp_endpoint = tracing_endpoint,
        "Reminder engine logging ready"
    );
    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .context("Failed to build OTLP span exporter")?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            TraceConfig::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(provider.clone());
    Ok(provider.tracer(SERVICE_NAME))
}

/// Flush pending spans; call once on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Serve `/metrics` on `metrics_port` and describe the reminder metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!(metric_names::FIRED, "Reminder firings delivered");
    describe_counter!(
        metric_names::FAILED,
        "Reminder firings abandoned, by failing stage"
    );
    describe_histogram!(
        metric_names::FIRE_DURATION,
        "Time from job wake-up to audit write, in seconds"
    );
    describe_histogram!(
        metric_names::AUDIENCE_SIZE,
        "Members mentioned per delivered firing"
    );
    describe_gauge!(metric_names::JOBS_ACTIVE, "Live dispatcher jobs");
    describe_counter!(
        metric_names::COMPLETIONS,
        "Completions recorded, by on-time flag"
    );

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_firing_delivered(task_id: TaskId, variant: ReminderVariant, audience_size: usize) {
    counter!(
        metric_names::FIRED,
        "task_id" => task_id.to_string(),
        "variant" => variant.to_string()
    )
    .increment(1);
    histogram!(metric_names::AUDIENCE_SIZE, "variant" => variant.to_string())
        .record(audience_size as f64);
}

/// `stage` is one of audience, notify, audit
pub fn record_firing_failed(task_id: TaskId, variant: ReminderVariant, stage: &str) {
    counter!(
        metric_names::FAILED,
        "task_id" => task_id.to_string(),
        "variant" => variant.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

pub fn record_fire_duration(variant: ReminderVariant, duration_seconds: f64) {
    histogram!(metric_names::FIRE_DURATION, "variant" => variant.to_string())
        .record(duration_seconds);
}

pub fn set_active_jobs(count: usize) {
    gauge!(metric_names::JOBS_ACTIVE).set(count as f64);
}

pub fn record_completion(on_time: bool) {
    counter!(metric_names::COMPLETIONS, "on_time" => on_time.to_string()).increment(1);
}

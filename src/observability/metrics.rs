//! OpenTelemetry metrics.
//!
//! Key metrics:
//! - herald_broadcast_total: Counter for values accepted by a serializer
//! - herald_effect_outcomes_total: Counter of effect outcomes by kind
//! - herald_wait_latency_seconds: Histogram for `wait_for_effects` duration
//! - herald_listeners: Gauge for registered listeners

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Herald metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of values accepted for broadcast.
    pub broadcast_total: Counter<u64>,
    /// Effect outcomes, labelled `matched`, `failed` or `timed_out`.
    pub effect_outcomes: Counter<u64>,
    /// Histogram of wait latency in seconds.
    pub wait_latency: Histogram<f64>,
    /// Listeners currently registered on the last broadcaster touched.
    pub listeners: Gauge<i64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            broadcast_total: meter
                .u64_counter("herald_broadcast_total")
                .with_description("Total number of values accepted for broadcast")
                .with_unit("1")
                .init(),
            effect_outcomes: meter
                .u64_counter("herald_effect_outcomes_total")
                .with_description("Terminal outcomes of waited effects")
                .with_unit("1")
                .init(),
            wait_latency: meter
                .f64_histogram("herald_wait_latency_seconds")
                .with_description("Duration of wait_for_effects calls")
                .with_unit("s")
                .init(),
            listeners: meter
                .i64_gauge("herald_listeners")
                .with_description("Registered listener mailboxes")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_reader();
                }
            }
        } else {
            // Recorded but never exported
            install_manual_reader();
        }

        let meter = global::meter("herald");
        Metrics::new(&meter)
    });
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record one value accepted by a serializer.
pub fn record_broadcast() {
    if let Some(m) = METRICS.get() {
        m.broadcast_total.add(1, &[]);
    }
}

/// Record the terminal outcome of one effect.
pub fn record_effect_outcome(outcome: &'static str) {
    if let Some(m) = METRICS.get() {
        m.effect_outcomes
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Record a finished `wait_for_effects` call.
pub fn record_wait(latency_seconds: f64, failed_effects: usize) {
    if let Some(m) = METRICS.get() {
        let result = if failed_effects == 0 { "ok" } else { "error" };
        m.wait_latency
            .record(latency_seconds, &[KeyValue::new("result", result)]);
    }
}

/// Record the current registry size.
pub fn record_listeners(count: usize) {
    if let Some(m) = METRICS.get() {
        m.listeners
            .record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(metrics().is_some());
    }

    #[test]
    fn test_recorders_do_not_panic() {
        init_metrics();
        record_broadcast();
        record_effect_outcome("matched");
        record_wait(0.002, 0);
        record_wait(0.1, 2);
        record_listeners(3);
    }
}

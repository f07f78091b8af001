//! Tracing subscriber and metric descriptions, installed once at startup.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {message}")]
pub struct TelemetryError {
    message: String,
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError {
            message: format!("failed to install tracing subscriber: {err}"),
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "ossatura_cache_hit_total",
            Unit::Count,
            "Total number of cache hits."
        );
        describe_counter!(
            "ossatura_cache_miss_total",
            Unit::Count,
            "Total number of cache misses."
        );
        describe_counter!(
            "ossatura_cache_error_total",
            Unit::Count,
            "Total number of cache operations absorbed fail-open after a backend error."
        );
        describe_counter!(
            "ossatura_image_optimize_total",
            Unit::Count,
            "Total number of image optimization requests served, cached or fresh."
        );
        describe_counter!(
            "ossatura_image_degraded_total",
            Unit::Count,
            "Total number of optimizations that fell back to the untouched source."
        );
        describe_histogram!(
            "ossatura_image_encode_ms",
            Unit::Milliseconds,
            "Derivative encode latency in milliseconds."
        );
        describe_counter!(
            "ossatura_perf_report_stored_total",
            Unit::Count,
            "Total number of performance reports persisted to the cache."
        );
    });
}

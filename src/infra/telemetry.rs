use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Output goes to stderr so command results on stdout stay pipeable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pastebin_cache_hit_total",
            Unit::Count,
            "Total number of accelerator hits, labelled by channel."
        );
        describe_counter!(
            "pastebin_cache_miss_total",
            Unit::Count,
            "Total number of accelerator misses, labelled by channel."
        );
        describe_counter!(
            "pastebin_cache_evict_total",
            Unit::Count,
            "Total number of accelerator evictions due to capacity."
        );
        describe_counter!(
            "pastebin_task_failed_total",
            Unit::Count,
            "Total number of background jobs that finished with an error."
        );
        describe_counter!(
            "pastebin_task_dropped_total",
            Unit::Count,
            "Total number of cache jobs dropped because the queue was full."
        );
    });
}

use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::featured::METRIC_FEATURED_PROMOTE;
use crate::application::rate_limit::METRIC_RATE_LIMITED;
use crate::cache::{METRIC_CACHE_FALLBACK, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Cache reads answered by the active tier, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Cache reads that found nothing, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_FALLBACK,
            Unit::Count,
            "Shared-backend calls that failed over to the fallback store."
        );
        describe_counter!(
            METRIC_RATE_LIMITED,
            Unit::Count,
            "Requests rejected by the rate gate, labelled by namespace."
        );
        describe_counter!(
            METRIC_FEATURED_PROMOTE,
            Unit::Count,
            "Successful featured promotions."
        );
    });
}

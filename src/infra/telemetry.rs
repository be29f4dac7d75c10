use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter,
    filter::Directive,
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

const QUIET_TARGETS: [&str; 3] = ["sqlx::query=warn", "apalis=warn", "hyper_util=info"];

pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = filter_for(logging);

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
        .map_err(InfraError::telemetry)
}

/// `RUST_LOG` wins when set. Otherwise the configured level applies, with
/// per-statement sqlx logs and worker heartbeats held back.
fn filter_for(logging: &LoggingSettings) -> EnvFilter {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::builder()
            .with_default_directive(logging.level.into())
            .from_env_lossy();
    }

    QUIET_TARGETS
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::new(logging.level.to_string()), |filter, directive| {
            filter.add_directive(directive)
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quire_newsletter_deliveries_total",
            Unit::Count,
            "Newsletter messages handed to the email provider, by outcome."
        );
        describe_counter!(
            "quire_webhook_events_total",
            Unit::Count,
            "Provider webhook events processed, by record type and outcome."
        );
        describe_counter!(
            "quire_subscription_attempts_rejected_total",
            Unit::Count,
            "Public subscribe attempts rejected, by reason."
        );
        describe_counter!(
            "quire_api_requests_limited_total",
            Unit::Count,
            "Admin API requests rejected by the per-key rate limiter."
        );
        describe_histogram!(
            "quire_provider_request_ms",
            Unit::Milliseconds,
            "Email provider request latency in milliseconds."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_targets_parse() {
        for target in QUIET_TARGETS {
            assert!(target.parse::<Directive>().is_ok(), "{target}");
        }
    }
}

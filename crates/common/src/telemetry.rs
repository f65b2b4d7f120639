//! Tracing initialisation shared by the binaries

use crate::config::ObservabilityConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directives` is used, with the
/// configured log level as the catch-all.
pub fn init_tracing(default_directives: &str, observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}", observability.log_level, default_directives))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if observability.structured_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

//! Tracing subscriber setup for Rift binaries.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the env filter, preferring `RUST_LOG` over `default_filter`.
///
/// Falls back to `default_filter` when `RUST_LOG` is set but unparsable.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter))
}

/// Install the global tracing subscriber.
///
/// * `default_filter` -- used when `RUST_LOG` is absent (e.g. `"rift_relay=info"`).
/// * `log_json` -- emit one JSON object per line for log aggregation.
pub fn init_tracing(default_filter: &str, log_json: bool) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(default_filter));
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_used_without_rust_log() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter("rift_relay=debug");
        assert_eq!(filter.to_string(), "rift_relay=debug");
    }
}

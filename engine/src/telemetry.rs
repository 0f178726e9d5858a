//! Logging for the swarm
//!
//! Sessions run concurrently, so their log lines interleave. Each session
//! therefore logs inside a [`session_span`] carrying its tag and kind, and
//! both output formats print the span fields next to every event. Output
//! goes to stderr so that answers printed on stdout stay pipeable.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the level the
//! caller passes (`--log`, then the configured `log_level`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Span wrapping everything one session does
pub fn session_span(tag: &str, kind: &str) -> tracing::Span {
    tracing::info_span!("session", tag = %tag, kind = %kind)
}

fn directives(log_level: &str) -> String {
    // transport noise (reqwest, hyper) stays at warn unless RUST_LOG asks
    format!("warn,chorus_engine={0},sdk={0}", log_level)
}

/// Install the global subscriber. Debug builds print human-readable lines,
/// release builds print one JSON object per event.
///
/// Installing twice is a no-op.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Used before a configuration is available
pub fn init_telemetry() {
    init_telemetry_with_level("warn");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_scope_level_to_our_crates() {
        let directives = directives("debug");
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("chorus_engine=debug"));
        assert!(directives.contains("sdk=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}

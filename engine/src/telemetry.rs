//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. Log lines go to
//! stderr so `--json` command output on stdout stays machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for a log level.
///
/// Dependency crates stay at `warn` unless the level is `debug` or `trace`,
/// the engine itself follows the requested level.
pub fn filter_directive(log_level: &str) -> String {
    match log_level {
        "debug" | "trace" => format!("{},pilot_engine={}", log_level, log_level),
        _ => format!("warn,pilot_engine={}", log_level),
    }
}

/// Initialize the tracing subscriber with the given log level.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
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

/// Initialize the tracing subscriber at "info".
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

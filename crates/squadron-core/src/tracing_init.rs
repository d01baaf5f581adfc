//! Shared tracing/logging initialization.
//!
//! The `squadron` binary and any embedding service use the same pattern for
//! setting up `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"squadron_runtime=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Logs go to stderr so that stdout stays free for JSON command output.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Build the default filter string for a crate at the given level.
pub fn default_filter(crate_name: &str, level: &str) -> String {
    format!("{crate_name}={level},squadron_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_core() {
        assert_eq!(
            default_filter("squadron_runtime", "debug"),
            "squadron_runtime=debug,squadron_core=debug"
        );
    }
}
